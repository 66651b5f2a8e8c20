use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub password_reset: PasswordResetConfig,
    pub smtp: Option<SmtpConfig>,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub access_secret: Secret<String>,
    pub refresh_secret: Secret<String>,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub expiry_minutes: i64,
    /// Wrong guesses tolerated before a challenge is discarded.
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct PasswordResetConfig {
    pub expiry_minutes: i64,
    pub app_base_url: String,
    pub reset_path: String,
}

impl PasswordResetConfig {
    /// Link mailed to the user for the link-based reset channel.
    pub fn reset_link(&self, raw_token: &str) -> String {
        format!(
            "{}{}?token={}",
            self.app_base_url.trim_end_matches('/'),
            self.reset_path,
            raw_token
        )
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
    pub otp_verify_attempts: u32,
    pub otp_verify_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: get_env_parsed("SMTP_PORT", Some("587"), false)?,
                user: get_env("SMTP_USER", None, false)?,
                password: Secret::new(get_env("SMTP_PASSWORD", None, false)?),
                from: get_env("SMTP_FROM", None, false)?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SMTP_HOST is required in production but not set"
                )))
            }
            Err(_) => None,
        };

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: get_env_parsed("DATABASE_MAX_CONNECTIONS", Some("10"), false)?,
                min_connections: get_env_parsed("DATABASE_MIN_CONNECTIONS", Some("1"), false)?,
            },
            jwt: JwtConfig {
                issuer: get_env("JWT_ISSUER", Some("identity-service"), false)?,
                access_secret: Secret::new(get_env("JWT_ACCESS_SECRET", None, is_prod)?),
                refresh_secret: Secret::new(get_env("JWT_REFRESH_SECRET", None, is_prod)?),
                access_token_expiry_minutes: get_env_parsed(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    false,
                )?,
                refresh_token_expiry_days: get_env_parsed(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("30"),
                    false,
                )?,
            },
            otp: OtpConfig {
                expiry_minutes: get_env_parsed("OTP_EXPIRY_MINUTES", Some("10"), false)?,
                max_attempts: get_env_parsed("OTP_MAX_ATTEMPTS", Some("5"), false)?,
            },
            password_reset: PasswordResetConfig {
                expiry_minutes: get_env_parsed("PASSWORD_RESET_EXPIRY_MINUTES", Some("30"), false)?,
                app_base_url: get_env("APP_BASE_URL", Some("http://localhost:3000"), is_prod)?,
                reset_path: get_env("RESET_PATH", Some("/reset-password"), false)?,
            },
            smtp,
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_env_parsed("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), false)?,
                login_window_seconds: get_env_parsed(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    false,
                )?,
                register_attempts: get_env_parsed("RATE_LIMIT_REGISTER_ATTEMPTS", Some("3"), false)?,
                register_window_seconds: get_env_parsed(
                    "RATE_LIMIT_REGISTER_WINDOW_SECONDS",
                    Some("3600"),
                    false,
                )?,
                password_reset_attempts: get_env_parsed(
                    "RATE_LIMIT_PASSWORD_RESET_ATTEMPTS",
                    Some("3"),
                    false,
                )?,
                password_reset_window_seconds: get_env_parsed(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    Some("3600"),
                    false,
                )?,
                otp_verify_attempts: get_env_parsed(
                    "RATE_LIMIT_OTP_VERIFY_ATTEMPTS",
                    Some("10"),
                    false,
                )?,
                otp_verify_window_seconds: get_env_parsed(
                    "RATE_LIMIT_OTP_VERIFY_WINDOW_SECONDS",
                    Some("900"),
                    false,
                )?,
                global_ip_limit: get_env_parsed("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), false)?,
                global_ip_window_seconds: get_env_parsed(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    false,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.otp.expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.otp.max_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_MAX_ATTEMPTS must be positive"
            )));
        }

        if self.password_reset.expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_RESET_EXPIRY_MINUTES must be positive"
            )));
        }

        let access = self.jwt.access_secret.expose_secret();
        let refresh = self.jwt.refresh_secret.expose_secret();

        if access.is_empty() || refresh.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must not be empty"
            )));
        }

        if access == refresh {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ"
            )));
        }

        if self.is_prod() {
            if access.len() < 32 || refresh.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT secrets must be at least 32 bytes in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_env_parsed<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    pub(crate) fn sample_config() -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8080,
            },
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: Secret::new("postgres://localhost/identity".to_string()),
                max_connections: 5,
                min_connections: 1,
            },
            jwt: JwtConfig {
                issuer: "identity-test".to_string(),
                access_secret: Secret::new("access-secret-for-tests-0123456789".to_string()),
                refresh_secret: Secret::new("refresh-secret-for-tests-0123456789".to_string()),
                access_token_expiry_minutes: 15,
                refresh_token_expiry_days: 30,
            },
            otp: OtpConfig {
                expiry_minutes: 10,
                max_attempts: 5,
            },
            password_reset: PasswordResetConfig {
                expiry_minutes: 30,
                app_base_url: "https://app.example.com/".to_string(),
                reset_path: "/reset-password".to_string(),
            },
            smtp: None,
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            rate_limit: RateLimitConfig {
                login_attempts: 5,
                login_window_seconds: 900,
                register_attempts: 3,
                register_window_seconds: 3600,
                password_reset_attempts: 3,
                password_reset_window_seconds: 3600,
                otp_verify_attempts: 10,
                otp_verify_window_seconds: 900,
                global_ip_limit: 100,
                global_ip_window_seconds: 60,
            },
        }
    }

    #[test]
    fn test_sample_config_is_valid() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let mut config = sample_config();
        config.jwt.refresh_secret = config.jwt.access_secret.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let mut config = sample_config();
        config.otp.expiry_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.otp.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prod_rejects_wildcard_origin_and_short_secrets() {
        let mut config = sample_config();
        config.environment = Environment::Prod;
        assert!(config.validate().is_ok());

        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.environment = Environment::Prod;
        config.jwt.access_secret = Secret::new("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reset_link_joins_base_and_path() {
        let config = sample_config();
        assert_eq!(
            config.password_reset.reset_link("abc"),
            "https://app.example.com/reset-password?token=abc"
        );
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
