use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{ConfirmPasswordResetRequest, EmailRequest, MessageResponse, ResetPasswordRequest},
    utils::ValidatedJson,
    AppState,
};

const RESET_ACCEPTED: &str = "If the account exists, password reset instructions have been sent.";

/// Email a password reset code
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Accepted; identical whether or not the account exists", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.forgot_password(&req.email).await?;
    Ok(Json(MessageResponse::new(RESET_ACCEPTED)))
}

/// Set a new password with an emailed reset code
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset; all sessions revoked", body = MessageResponse),
        (status = 400, description = "Invalid or expired OTP", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.reset_password(req).await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Email a single-use password reset link
#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Accepted; identical whether or not the account exists", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .request_password_reset_link(&req.email)
        .await?;
    Ok(Json(MessageResponse::new(RESET_ACCEPTED)))
}

/// Set a new password with a reset link token
#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    request_body = ConfirmPasswordResetRequest,
    responses(
        (status = 200, description = "Password reset; all sessions revoked", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Password"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ConfirmPasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.confirm_password_reset_link(req).await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
