//! Durable state behind the auth flows.
//!
//! Each concern is a capability trait so the orchestrator can run against
//! PostgreSQL in production and the in-memory store in tests. Every
//! operation that must be atomic (refresh revoke, OTP upsert, reset token
//! consume) is a single conditional write in the backend.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{OtpChallenge, OtpPurpose, User};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Duplicate,

    #[error("record not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Account records. Email lookups expect an already-normalized address.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fails with `Duplicate` if the email is taken.
    async fn create_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn mark_email_verified(&self, id: Uuid) -> StoreResult<()>;
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;
}

/// Registry of issued refresh tokens.
#[async_trait]
pub trait SessionLedger: Send + Sync {
    async fn store(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// True iff the row exists, is not revoked, and has not expired.
    async fn is_valid(&self, user_id: Uuid, token_hash: &str) -> StoreResult<bool>;

    /// Revoke one token. Returns whether this call flipped it from live to
    /// revoked; a missing or already revoked row yields `false`.
    async fn revoke(&self, user_id: Uuid, token_hash: &str) -> StoreResult<bool>;

    /// Revoke every live token of a user, returning how many were revoked.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> StoreResult<u64>;
}

/// One active code per (user, purpose).
#[async_trait]
pub trait OtpChallengeStore: Send + Sync {
    /// Insert or replace the code for (user, purpose).
    async fn upsert(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        otp_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// The current challenge, absent if missing or already expired.
    async fn get_valid(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> StoreResult<Option<OtpChallenge>>;

    /// Returns whether a row was removed.
    async fn delete(&self, user_id: Uuid, purpose: OtpPurpose) -> StoreResult<bool>;

    /// Count a wrong guess against the challenge. Once `max_attempts` is
    /// reached the row is removed; returns whether that happened.
    async fn record_failure(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        max_attempts: i32,
    ) -> StoreResult<bool>;
}

/// Link-based password reset tokens.
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Mark the token used if it is unused and unexpired, returning its owner.
    async fn consume(&self, token_hash: &str) -> StoreResult<Option<Uuid>>;
}

#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;
}

/// Every store capability the orchestrator needs, usually backed by one value.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserDirectory>,
    pub sessions: Arc<dyn SessionLedger>,
    pub otps: Arc<dyn OtpChallengeStore>,
    pub reset_tokens: Arc<dyn ResetTokenStore>,
    pub health: Arc<dyn StoreHealth>,
}

impl Stores {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserDirectory + SessionLedger + OtpChallengeStore + ResetTokenStore + StoreHealth + 'static,
    {
        Self {
            users: backend.clone(),
            sessions: backend.clone(),
            otps: backend.clone(),
            reset_tokens: backend.clone(),
            health: backend,
        }
    }
}
