//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    OtpChallengeStore, ResetTokenStore, SessionLedger, StoreError, StoreHealth, StoreResult,
    UserDirectory,
};
use crate::models::{OtpChallenge, OtpPurpose, User};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    role: String,
    is_active: bool,
    email_verified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse().map_err(StoreError::Unavailable)?;
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role,
            is_active: row.is_active,
            email_verified: row.email_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OtpRow {
    otp_hash: String,
    expires_at: DateTime<Utc>,
    failed_attempts: i32,
}

const USER_COLUMNS: &str =
    "id, email, password_hash, role, is_active, email_verified, created_at, updated_at";

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => StoreError::Duplicate,
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, role, is_active, email_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn mark_email_verified(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET email_verified = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, password_hash))]
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionLedger for PostgresStore {
    #[instrument(skip(self, token_hash))]
    async fn store(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(())
    }

    async fn is_valid(&self, user_id: Uuid, token_hash: &str) -> StoreResult<bool> {
        let valid: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM refresh_tokens
                WHERE user_id = $1 AND token_hash = $2
                  AND revoked_at IS NULL AND expires_at > now()
            )
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(valid)
    }

    #[instrument(skip(self, token_hash))]
    async fn revoke(&self, user_id: Uuid, token_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked_at = now()
            WHERE user_id = $1 AND token_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn revoke_all_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        debug!(revoked = result.rows_affected(), "Revoked refresh tokens");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OtpChallengeStore for PostgresStore {
    #[instrument(skip(self, otp_hash), fields(purpose = purpose.as_str()))]
    async fn upsert(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        otp_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_otps (user_id, purpose, otp_hash, expires_at, failed_attempts, created_at)
            VALUES ($1, $2, $3, $4, 0, now())
            ON CONFLICT (user_id, purpose)
            DO UPDATE SET otp_hash = EXCLUDED.otp_hash,
                          expires_at = EXCLUDED.expires_at,
                          failed_attempts = 0,
                          created_at = now()
            "#,
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(otp_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_valid(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
    ) -> StoreResult<Option<OtpChallenge>> {
        let row = sqlx::query_as::<_, OtpRow>(
            r#"
            SELECT otp_hash, expires_at, failed_attempts FROM user_otps
            WHERE user_id = $1 AND purpose = $2 AND expires_at > now()
            "#,
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| OtpChallenge {
            user_id,
            purpose,
            otp_hash: r.otp_hash,
            expires_at: r.expires_at,
            failed_attempts: r.failed_attempts,
        }))
    }

    async fn delete(&self, user_id: Uuid, purpose: OtpPurpose) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM user_otps WHERE user_id = $1 AND purpose = $2")
            .bind(user_id)
            .bind(purpose.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(purpose = purpose.as_str()))]
    async fn record_failure(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        max_attempts: i32,
    ) -> StoreResult<bool> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE user_otps SET failed_attempts = failed_attempts + 1
            WHERE user_id = $1 AND purpose = $2
            RETURNING failed_attempts
            "#,
        )
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match attempts {
            Some(n) if n >= max_attempts => {
                let result = sqlx::query(
                    "DELETE FROM user_otps WHERE user_id = $1 AND purpose = $2 AND failed_attempts >= $3",
                )
                .bind(user_id)
                .bind(purpose.as_str())
                .bind(max_attempts)
                .execute(&self.pool)
                .await?;

                Ok(result.rows_affected() > 0)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ResetTokenStore for PostgresStore {
    #[instrument(skip(self, token_hash))]
    async fn create(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO password_resets (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(())
    }

    async fn consume(&self, token_hash: &str) -> StoreResult<Option<Uuid>> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE password_resets SET used_at = now()
            WHERE token_hash = $1 AND used_at IS NULL AND expires_at > now()
            RETURNING user_id
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }
}

#[async_trait]
impl StoreHealth for PostgresStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
