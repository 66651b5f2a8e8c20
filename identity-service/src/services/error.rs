use service_core::error::AppError;
use thiserror::Error;

use crate::services::jwt::TokenRejection;
use crate::stores::StoreError;

/// Why a caller was not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("token is malformed")]
    TokenMalformed,
    #[error("token has expired")]
    TokenExpired,
    #[error("token has been revoked")]
    TokenRevoked,
    #[error("token has already been used")]
    TokenReused,
}

impl From<TokenRejection> for AuthFailure {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Malformed => AuthFailure::TokenMalformed,
            TokenRejection::Expired => AuthFailure::TokenExpired,
        }
    }
}

/// Why an authenticated caller was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("email not verified")]
    EmailNotVerified,
    #[error("insufficient role")]
    InsufficientRole,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unauthorized: {0}")]
    Unauthorized(AuthFailure),

    #[error("Forbidden: {0}")]
    Forbidden(AccessDenied),

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid or expired OTP")]
    InvalidOrExpiredOtp,

    #[error("Invalid or expired token")]
    InvalidOrExpiredResetToken,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenRejection> for ServiceError {
    fn from(rejection: TokenRejection) -> Self {
        ServiceError::Unauthorized(rejection.into())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized(reason) => AppError::Unauthorized(anyhow::anyhow!(
                public_auth_message(reason)
            )),
            ServiceError::Forbidden(reason) => {
                AppError::Forbidden(anyhow::anyhow!(reason.to_string()))
            }
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::InvalidOrExpiredOtp => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired OTP"))
            }
            ServiceError::InvalidOrExpiredResetToken => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

/// Malformed and expired tokens read the same to the client.
fn public_auth_message(reason: AuthFailure) -> &'static str {
    match reason {
        AuthFailure::InvalidCredentials => "Invalid email or password",
        AuthFailure::TokenMalformed | AuthFailure::TokenExpired => "Invalid token",
        AuthFailure::TokenRevoked => "Token revoked",
        AuthFailure::TokenReused => "Token already used",
    }
}
