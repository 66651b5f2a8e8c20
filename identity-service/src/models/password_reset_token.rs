use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Link-based password reset token. Single use: `used_at` is set exactly once.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn new(user_id: Uuid, token_hash: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash,
            user_id,
            expires_at,
            used_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}
