use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::{IdentityConfig, PasswordResetConfig},
    dtos::auth::{
        ConfirmPasswordResetRequest, LoginRequest, LoginResponse, RegisterRequest,
        RegisterResponse, ResetPasswordRequest, TokenPairResponse, VerifyEmailRequest,
    },
    models::{normalize_email, OtpPurpose, Role, User, UserResponse},
    services::{
        email::{reset_link_message, reset_otp_message, verification_otp_message, Notifier},
        error::{AccessDenied, AuthFailure, ServiceError},
        jwt::JwtService,
        metrics::record_auth_event,
    },
    stores::{StoreError, Stores},
    utils::{
        generate_otp, generate_reset_token, hash_password, hash_token, otp_matches,
        verify_against_dummy, verify_password, Password, PasswordHashString,
    },
};

/// Composes credentials, tokens, the session ledger and OTP challenges into
/// the request-level auth flows.
#[derive(Clone)]
pub struct AuthService {
    stores: Stores,
    notifier: Arc<dyn Notifier>,
    jwt: Arc<JwtService>,
    otp_ttl: Duration,
    otp_ttl_minutes: i64,
    otp_max_attempts: i32,
    password_reset: PasswordResetConfig,
}

impl AuthService {
    pub fn new(
        config: &IdentityConfig,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        jwt: Arc<JwtService>,
    ) -> Self {
        Self {
            stores,
            notifier,
            jwt,
            otp_ttl: Duration::minutes(config.otp.expiry_minutes),
            otp_ttl_minutes: config.otp.expiry_minutes,
            otp_max_attempts: config.otp.max_attempts,
            password_reset: config.password_reset.clone(),
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<RegisterResponse, ServiceError> {
        let email = normalize_email(&req.email);

        let password_hash = hash_password(&Password::new(req.password)).map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
        })?;

        let user = User::new(email, password_hash.into_string(), Role::User);

        match self.stores.users.create_user(&user).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                record_auth_event("register", "conflict");
                return Err(ServiceError::EmailAlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, "User registered");
        record_auth_event("register", "success");

        // The account exists now; a delivery failure must not fail the request.
        if let Err(e) = self.issue_verification_otp(&user).await {
            tracing::error!(user_id = %user.id, error = %e, "Failed to send verification code");
        }

        Ok(RegisterResponse {
            user: user.sanitized(),
            message: "Registration successful. Check your email for a verification code."
                .to_string(),
        })
    }

    /// Reissue the verification code. Silent for unknown, inactive or
    /// already verified accounts.
    pub async fn resend_verification(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);

        let result: Result<(), ServiceError> = async {
            match self.stores.users.find_user_by_email(&email).await? {
                Some(user) if user.is_active && !user.email_verified => {
                    self.issue_verification_otp(&user).await
                }
                _ => Ok(()),
            }
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to resend verification code");
        }
        Ok(())
    }

    pub async fn verify_email(&self, req: VerifyEmailRequest) -> Result<(), ServiceError> {
        let email = normalize_email(&req.email);

        let user = self
            .stores
            .users
            .find_user_by_email(&email)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        self.claim_otp(user.id, OtpPurpose::VerifyEmail, &req.otp)
            .await?;

        self.stores.users.mark_email_verified(user.id).await?;

        tracing::info!(user_id = %user.id, "Email verified");
        record_auth_event("verify_email", "success");
        Ok(())
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, ServiceError> {
        let email = normalize_email(&req.email);
        let password = Password::new(req.password);

        let user = match self.stores.users.find_user_by_email(&email).await? {
            Some(user) if user.is_active => user,
            _ => {
                verify_against_dummy(&password);
                record_auth_event("login", "invalid_credentials");
                return Err(ServiceError::Unauthorized(AuthFailure::InvalidCredentials));
            }
        };

        let stored = PasswordHashString::new(user.password_hash.clone());
        if !verify_password(&password, &stored) {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            record_auth_event("login", "invalid_credentials");
            return Err(ServiceError::Unauthorized(AuthFailure::InvalidCredentials));
        }

        if !user.email_verified {
            record_auth_event("login", "unverified");
            return Err(ServiceError::Forbidden(AccessDenied::EmailNotVerified));
        }

        let tokens = self.issue_session(user.id, user.role).await?;

        tracing::info!(user_id = %user.id, "User logged in");
        record_auth_event("login", "success");

        Ok(LoginResponse {
            user: user.sanitized(),
            tokens,
        })
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair
    /// issued. A token that loses the revoke race is treated as replayed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPairResponse, ServiceError> {
        let claims = self.jwt.parse_refresh(refresh_token).map_err(|e| {
            record_auth_event("refresh", "rejected");
            ServiceError::from(e)
        })?;

        let token_hash = hash_token(refresh_token);

        // A correctly signed token with no live row was already rotated,
        // logged out or revoked by a password reset.
        if !self.stores.sessions.is_valid(claims.uid, &token_hash).await? {
            tracing::warn!(user_id = %claims.uid, "Refresh token reuse detected");
            record_auth_event("refresh", "reused");
            return Err(ServiceError::Unauthorized(AuthFailure::TokenRevoked));
        }

        if !self.stores.sessions.revoke(claims.uid, &token_hash).await? {
            tracing::warn!(user_id = %claims.uid, "Refresh token reuse detected");
            record_auth_event("refresh", "reused");
            return Err(ServiceError::Unauthorized(AuthFailure::TokenReused));
        }

        // Role comes from the account, not from the old token.
        let user = match self.stores.users.find_user_by_id(claims.uid).await? {
            Some(user) if user.is_active => user,
            _ => {
                record_auth_event("refresh", "rejected");
                return Err(ServiceError::Unauthorized(AuthFailure::TokenRevoked));
            }
        };

        let tokens = self.issue_session(user.id, user.role).await?;

        tracing::debug!(user_id = %user.id, "Refresh token rotated");
        record_auth_event("refresh", "success");
        Ok(tokens)
    }

    /// Best effort; never fails.
    pub async fn logout(&self, refresh_token: &str) {
        let Ok(claims) = self.jwt.parse_refresh(refresh_token) else {
            return;
        };

        match self
            .stores
            .sessions
            .revoke(claims.uid, &hash_token(refresh_token))
            .await
        {
            Ok(true) => {
                tracing::info!(user_id = %claims.uid, "User logged out");
                record_auth_event("logout", "success");
            }
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Failed to revoke refresh token on logout"),
        }
    }

    /// Send a password reset code. Silent for unknown or inactive accounts.
    pub async fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);

        let result: Result<(), ServiceError> = async {
            match self.stores.users.find_user_by_email(&email).await? {
                Some(user) if user.is_active => {
                    let otp = self
                        .issue_otp(user.id, OtpPurpose::ResetPassword)
                        .await?;
                    let msg = reset_otp_message(&otp, self.otp_ttl_minutes);
                    self.notify(&user.email, &msg.subject, &msg.body).await
                }
                _ => Ok(()),
            }
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to issue password reset code");
        }
        record_auth_event("forgot_password", "accepted");
        Ok(())
    }

    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), ServiceError> {
        let email = normalize_email(&req.email);

        let user = self
            .stores
            .users
            .find_user_by_email(&email)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        self.claim_otp(user.id, OtpPurpose::ResetPassword, &req.otp)
            .await?;

        self.replace_password(user.id, req.new_password).await?;
        record_auth_event("reset_password", "success");
        Ok(())
    }

    /// Mail a single-use reset link. Silent for unknown or inactive accounts.
    pub async fn request_password_reset_link(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);

        let result: Result<(), ServiceError> = async {
            match self.stores.users.find_user_by_email(&email).await? {
                Some(user) if user.is_active => {
                    let raw = generate_reset_token();
                    let expires_at =
                        Utc::now() + Duration::minutes(self.password_reset.expiry_minutes);
                    self.stores
                        .reset_tokens
                        .create(user.id, &hash_token(&raw), expires_at)
                        .await?;

                    let link = self.password_reset.reset_link(&raw);
                    let msg = reset_link_message(&link, self.password_reset.expiry_minutes);
                    self.notify(&user.email, &msg.subject, &msg.body).await
                }
                _ => Ok(()),
            }
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to issue password reset link");
        }
        record_auth_event("reset_link_request", "accepted");
        Ok(())
    }

    pub async fn confirm_password_reset_link(
        &self,
        req: ConfirmPasswordResetRequest,
    ) -> Result<(), ServiceError> {
        let user_id = self
            .stores
            .reset_tokens
            .consume(&hash_token(&req.token))
            .await?
            .ok_or(ServiceError::InvalidOrExpiredResetToken)?;

        self.replace_password(user_id, req.new_password).await?;
        record_auth_event("reset_link_confirm", "success");
        Ok(())
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<UserResponse, ServiceError> {
        self.stores
            .users
            .find_user_by_id(user_id)
            .await?
            .map(|u| u.sanitized())
            .ok_or(ServiceError::UserNotFound)
    }

    pub async fn store_ready(&self) -> bool {
        match self.stores.health.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store health check failed");
                false
            }
        }
    }

    async fn issue_session(
        &self,
        user_id: Uuid,
        role: Role,
    ) -> Result<TokenPairResponse, ServiceError> {
        let access = self.jwt.sign_access(user_id, role)?;
        let refresh = self.jwt.sign_refresh(user_id, role)?;

        self.stores
            .sessions
            .store(user_id, &hash_token(&refresh.token), refresh.expires_at)
            .await?;

        Ok(TokenPairResponse {
            access_token: access.token,
            access_exp: access.expires_at,
            refresh_token: refresh.token,
            refresh_exp: refresh.expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Store a fresh code for (user, purpose), replacing any earlier one.
    async fn issue_otp(&self, user_id: Uuid, purpose: OtpPurpose) -> Result<String, ServiceError> {
        let otp = generate_otp();
        self.stores
            .otps
            .upsert(user_id, purpose, &hash_token(&otp), Utc::now() + self.otp_ttl)
            .await?;
        Ok(otp)
    }

    async fn issue_verification_otp(&self, user: &User) -> Result<(), ServiceError> {
        let otp = self.issue_otp(user.id, OtpPurpose::VerifyEmail).await?;
        let msg = verification_otp_message(&otp, self.otp_ttl_minutes);
        self.notify(&user.email, &msg.subject, &msg.body).await
    }

    /// Check a submitted code and consume it. Only the caller whose delete
    /// removes the row may act on it, so a code is honoured at most once.
    /// Wrong guesses are counted and the challenge is dropped at the cap.
    async fn claim_otp(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        submitted: &str,
    ) -> Result<(), ServiceError> {
        let challenge = self
            .stores
            .otps
            .get_valid(user_id, purpose)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        if !challenge.is_live_at(Utc::now()) {
            record_auth_event(purpose.as_str(), "expired_otp");
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        if !otp_matches(submitted, &challenge.otp_hash) {
            record_auth_event(purpose.as_str(), "invalid_otp");
            if self
                .stores
                .otps
                .record_failure(user_id, purpose, self.otp_max_attempts)
                .await?
            {
                tracing::warn!(
                    user_id = %user_id,
                    purpose = purpose.as_str(),
                    "OTP discarded after too many wrong attempts"
                );
            }
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        if !self.stores.otps.delete(user_id, purpose).await? {
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        Ok(())
    }

    async fn replace_password(&self, user_id: Uuid, new_password: String) -> Result<(), ServiceError> {
        let password_hash = hash_password(&Password::new(new_password)).map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e))
        })?;

        self.stores
            .users
            .update_password_hash(user_id, password_hash.as_str())
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ServiceError::InvalidOrExpiredResetToken,
                other => other.into(),
            })?;

        let revoked = self.stores.sessions.revoke_all_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, revoked_sessions = revoked, "Password reset");
        Ok(())
    }

    async fn notify(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError> {
        self.notifier
            .send(to, subject, body)
            .await
            .map_err(ServiceError::Internal)
    }
}
