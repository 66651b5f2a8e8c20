use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::models::UserResponse;

fn validate_otp_digits(otp: &str) -> Result<(), ValidationError> {
    if otp.len() == 6 && otp.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("otp_format"))
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    #[schema(example = "password123", min_length = 8)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserResponse,
    #[schema(example = "Registration successful. Check your email for a verification code.")]
    pub message: String,
}

/// Body for every flow keyed only by an email address.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyEmailRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(custom(function = "validate_otp_digits", message = "OTP must be 6 digits"))]
    #[schema(example = "123456")]
    pub otp: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserResponse,
    #[serde(flatten)]
    pub tokens: TokenPairResponse,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "eyJhbGciOiJIUzI1NiJ9...")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LogoutRequest {
    #[schema(example = "eyJhbGciOiJIUzI1NiJ9...")]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub access_exp: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_exp: DateTime<Utc>,
    #[schema(example = "Bearer")]
    pub token_type: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(custom(function = "validate_otp_digits", message = "OTP must be 6 digits"))]
    #[schema(example = "123456")]
    pub otp: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    #[schema(example = "newPassword123", min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConfirmPasswordResetRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "Yk3q...")]
    pub token: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    #[schema(example = "newPassword123", min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "If the account exists, an email has been sent.")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OkResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_must_be_six_digits() {
        let ok = VerifyEmailRequest {
            email: "a@example.com".to_string(),
            otp: "123456".to_string(),
        };
        assert!(ok.validate().is_ok());

        for bad in ["12345", "1234567", "12a456", ""] {
            let req = VerifyEmailRequest {
                email: "a@example.com".to_string(),
                otp: bad.to_string(),
            };
            assert!(req.validate().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_register_password_length() {
        let req = RegisterRequest {
            email: "a@example.com".to_string(),
            password: "short".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_login_response_is_flat() {
        let user = crate::models::User::new(
            "a@example.com".to_string(),
            "hash".to_string(),
            crate::models::Role::User,
        );
        let response = LoginResponse {
            user: user.sanitized(),
            tokens: TokenPairResponse {
                access_token: "a".to_string(),
                access_exp: Utc::now(),
                refresh_token: "r".to_string(),
                refresh_exp: Utc::now(),
                token_type: "Bearer".to_string(),
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("access_token").is_some());
        assert!(json.get("refresh_exp").is_some());
        assert!(json.get("user").is_some());
    }
}
