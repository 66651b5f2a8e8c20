//! Shared harness for identity-service integration tests.
//!
//! Builds the real router on top of the in-memory store and a capturing
//! notifier, and drives it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, JwtConfig, OtpConfig, PasswordResetConfig,
        RateLimitConfig, SecurityConfig,
    },
    services::{metrics, AuthService, JwtService, MockNotifier},
    stores::{InMemoryStore, Stores},
    AppState, RateLimiters,
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        },
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
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
            app_base_url: "https://app.example.com".to_string(),
            reset_path: "/reset-password".to_string(),
        },
        smtp: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            password_reset_attempts: 1000,
            password_reset_window_seconds: 60,
            otp_verify_attempts: 1000,
            otp_verify_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<MockNotifier>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_config())
    }

    pub fn spawn_with(config: IdentityConfig) -> Self {
        metrics::init_metrics().expect("Failed to init metrics");

        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let jwt = Arc::new(JwtService::new(&config.jwt).expect("Failed to create JWT service"));

        let auth_service = AuthService::new(
            &config,
            Stores::from_backend(store.clone()),
            notifier.clone(),
            jwt,
        );

        let state = AppState {
            rate_limiters: RateLimiters::from_config(&config.rate_limit),
            config,
            auth_service,
        };

        Self {
            router: build_router(state.clone()),
            state,
            store,
            notifier,
        }
    }

    pub async fn request(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.request(req).await
    }

    pub async fn get_with_bearer(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .uri(path)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.request(req).await
    }

    /// Most recent six-digit code mailed to `email`.
    pub fn latest_otp(&self, email: &str) -> String {
        let msg = self
            .notifier
            .last_to(email)
            .unwrap_or_else(|| panic!("no email sent to {}", email));
        extract_otp(&msg.body).unwrap_or_else(|| panic!("no code in {:?}", msg.body))
    }

    /// Raw token from the most recent reset link mailed to `email`.
    pub fn latest_reset_token(&self, email: &str) -> String {
        let msg = self
            .notifier
            .last_to(email)
            .unwrap_or_else(|| panic!("no email sent to {}", email));
        extract_reset_token(&msg.body).unwrap_or_else(|| panic!("no link in {:?}", msg.body))
    }

    pub async fn register(&self, email: &str) -> Uuid {
        let (status, body) = self
            .post_json(
                "/auth/register",
                json!({ "email": email, "password": TEST_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["user"]["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn register_verified(&self, email: &str) -> Uuid {
        let user_id = self.register(email).await;
        let otp = self.latest_otp(email);
        let (status, body) = self
            .post_json("/auth/verify-email", json!({ "email": email, "otp": otp }))
            .await;
        assert_eq!(status, StatusCode::OK, "verify failed: {}", body);
        user_id
    }

    /// Login response body for a verified account.
    pub async fn login(&self, email: &str) -> Value {
        let (status, body) = self
            .post_json(
                "/auth/login",
                json!({ "email": email, "password": TEST_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body
    }

    pub fn auth_service(&self) -> &AuthService {
        &self.state.auth_service
    }
}

/// First run of exactly six consecutive digits.
pub fn extract_otp(body: &str) -> Option<String> {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() == 6)
        .map(str::to_string)
}

pub fn extract_reset_token(body: &str) -> Option<String> {
    let start = body.find("?token=")? + "?token=".len();
    let token: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!token.is_empty()).then_some(token)
}
