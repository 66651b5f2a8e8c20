//! In-memory store with the same atomicity as the PostgreSQL one.
//!
//! All state sits behind one mutex and every trait call is a single critical
//! section, so conditional writes (revoke, consume, upsert) behave exactly
//! like their SQL counterparts under concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    OtpChallengeStore, ResetTokenStore, SessionLedger, StoreError, StoreHealth, StoreResult,
    UserDirectory,
};
use crate::models::{OtpChallenge, OtpPurpose, PasswordResetToken, RefreshTokenRecord, User};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    otps: HashMap<(Uuid, OtpPurpose), OtpChallenge>,
    reset_tokens: HashMap<String, PasswordResetToken>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Refresh rows of a user that are still live.
    pub fn live_session_count(&self, user_id: Uuid) -> usize {
        let now = Utc::now();
        self.lock()
            .map(|state| {
                state
                    .refresh_tokens
                    .values()
                    .filter(|r| r.user_id == user_id && r.is_valid_at(now))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Force an OTP challenge's expiry, e.g. to exercise the boundary.
    pub fn set_otp_expiry(&self, user_id: Uuid, purpose: OtpPurpose, expires_at: DateTime<Utc>) {
        if let Ok(mut state) = self.lock() {
            if let Some(challenge) = state.otps.get_mut(&(user_id, purpose)) {
                challenge.expires_at = expires_at;
            }
        }
    }

    /// Toggle the active flag on an account.
    pub fn set_user_active(&self, user_id: Uuid, is_active: bool) {
        if let Ok(mut state) = self.lock() {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.is_active = is_active;
                user.updated_at = Utc::now();
            }
        }
    }

    pub fn set_user_role(&self, user_id: Uuid, role: crate::models::Role) {
        if let Ok(mut state) = self.lock() {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.role = role;
                user.updated_at = Utc::now();
            }
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate);
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.lock()?;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let state = self.lock()?;
        Ok(state.users.get(&id).cloned())
    }

    async fn mark_email_verified(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.email_verified = true;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        let user = state.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SessionLedger for InMemoryStore {
    async fn store(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.refresh_tokens.contains_key(token_hash) {
            return Err(StoreError::Duplicate);
        }
        state.refresh_tokens.insert(
            token_hash.to_string(),
            RefreshTokenRecord::new(user_id, token_hash.to_string(), expires_at),
        );
        Ok(())
    }

    async fn is_valid(&self, user_id: Uuid, token_hash: &str) -> StoreResult<bool> {
        let state = self.lock()?;
        Ok(state
            .refresh_tokens
            .get(token_hash)
            .map(|r| r.user_id == user_id && r.is_valid_at(Utc::now()))
            .unwrap_or(false))
    }

    async fn revoke(&self, user_id: Uuid, token_hash: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.refresh_tokens.get_mut(token_hash) {
            Some(record) if record.user_id == user_id && !record.is_revoked() => {
                record.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let mut revoked = 0;
        for record in state.refresh_tokens.values_mut() {
            if record.user_id == user_id && !record.is_revoked() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[async_trait]
impl OtpChallengeStore for InMemoryStore {
    async fn upsert(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        otp_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.otps.insert(
            (user_id, purpose),
            OtpChallenge {
                user_id,
                purpose,
                otp_hash: otp_hash.to_string(),
                expires_at,
                failed_attempts: 0,
            },
        );
        Ok(())
    }

    async fn get_valid(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> StoreResult<Option<OtpChallenge>> {
        let state = self.lock()?;
        let now = Utc::now();
        Ok(state
            .otps
            .get(&(user_id, purpose))
            .filter(|c| c.is_live_at(now))
            .cloned())
    }

    async fn delete(&self, user_id: Uuid, purpose: OtpPurpose) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state.otps.remove(&(user_id, purpose)).is_some())
    }

    async fn record_failure(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        max_attempts: i32,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let key = (user_id, purpose);
        let Some(challenge) = state.otps.get_mut(&key) else {
            return Ok(false);
        };

        challenge.failed_attempts += 1;
        if challenge.failed_attempts >= max_attempts {
            state.otps.remove(&key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl ResetTokenStore for InMemoryStore {
    async fn create(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.reset_tokens.contains_key(token_hash) {
            return Err(StoreError::Duplicate);
        }
        state.reset_tokens.insert(
            token_hash.to_string(),
            PasswordResetToken::new(user_id, token_hash.to_string(), expires_at),
        );
        Ok(())
    }

    async fn consume(&self, token_hash: &str) -> StoreResult<Option<Uuid>> {
        let mut state = self.lock()?;
        let now = Utc::now();
        match state.reset_tokens.get_mut(token_hash) {
            Some(token) if token.is_usable_at(now) => {
                token.used_at = Some(now);
                Ok(Some(token.user_id))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl StoreHealth for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}
