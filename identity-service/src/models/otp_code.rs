//! OTP challenge model - one active code per (user, purpose).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// What an OTP code is allowed to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    VerifyEmail,
    ResetPassword,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::VerifyEmail => "verify_email",
            OtpPurpose::ResetPassword => "reset_password",
        }
    }
}

impl FromStr for OtpPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verify_email" => Ok(OtpPurpose::VerifyEmail),
            "reset_password" => Ok(OtpPurpose::ResetPassword),
            _ => Err(format!("Invalid OTP purpose: {}", s)),
        }
    }
}

/// Stored challenge. Only the SHA-256 of the code is kept.
#[derive(Debug, Clone)]
pub struct OtpChallenge {
    pub user_id: Uuid,
    pub purpose: OtpPurpose,
    pub otp_hash: String,
    pub expires_at: DateTime<Utc>,
    pub failed_attempts: i32,
}

impl OtpChallenge {
    /// A code is accepted strictly before `expires_at`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
