use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::Role;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by both access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub uid: Uuid,
    pub role: Role,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Random per token so two tokens signed in the same second differ
    pub jti: String,
}

/// Why a presented token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("token is malformed or has an invalid signature")]
    Malformed,
    #[error("token has expired")]
    Expired,
}

/// A freshly signed token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs and verifies access and refresh tokens, each under its own HMAC key.
pub struct JwtService {
    access: KeyPair,
    refresh: KeyPair,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let access_secret = config.access_secret.expose_secret();
        let refresh_secret = config.refresh_secret.expose_secret();

        if access_secret.is_empty() || refresh_secret.is_empty() {
            anyhow::bail!("JWT secrets must not be empty");
        }
        if access_secret == refresh_secret {
            anyhow::bail!("Access and refresh tokens must use different secrets");
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        tracing::info!(issuer = %config.issuer, "JWT service initialized with HS256 keys");

        Ok(Self {
            access: KeyPair::from_secret(access_secret),
            refresh: KeyPair::from_secret(refresh_secret),
            issuer: config.issuer.clone(),
            access_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
            validation,
        })
    }

    pub fn sign_access(&self, user_id: Uuid, role: Role) -> Result<SignedToken, anyhow::Error> {
        self.sign(&self.access, self.access_ttl, user_id, role)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    pub fn sign_refresh(&self, user_id: Uuid, role: Role) -> Result<SignedToken, anyhow::Error> {
        self.sign(&self.refresh, self.refresh_ttl, user_id, role)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))
    }

    pub fn parse_access(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.parse(&self.access, token)
    }

    pub fn parse_refresh(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.parse(&self.refresh, token)
    }

    fn sign(
        &self,
        keys: &KeyPair,
        ttl: Duration,
        user_id: Uuid,
        role: Role,
    ) -> Result<SignedToken, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            uid: user_id,
            role,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &keys.encoding)?;

        // Report the second-truncated instant actually encoded in the token.
        let expires_at = Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(exp);

        Ok(SignedToken { token, expires_at })
    }

    fn parse(&self, keys: &KeyPair, token: &str) -> Result<Claims, TokenRejection> {
        // Reject any other algorithm before the signature is looked at.
        let header = decode_header(token).map_err(|_| TokenRejection::Malformed)?;
        if header.alg != ALGORITHM {
            return Err(TokenRejection::Malformed);
        }

        decode::<Claims>(token, &keys.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                _ => TokenRejection::Malformed,
            })
    }
}
