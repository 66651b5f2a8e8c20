mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{TestApp, TEST_PASSWORD};
use identity_service::models::OtpPurpose;
use serde_json::json;

const NEW_PASSWORD: &str = "a-much-better-password";

async fn login_status(app: &TestApp, email: &str, password: &str) -> StatusCode {
    app.post_json(
        "/auth/login",
        json!({ "email": email, "password": password }),
    )
    .await
    .0
}

#[tokio::test]
async fn test_forgot_password_response_does_not_leak_existence() {
    let app = TestApp::spawn();
    app.register_verified("real@example.com").await;

    let (known_status, known_body) = app
        .post_json("/auth/forgot-password", json!({ "email": "real@example.com" }))
        .await;
    let (unknown_status, unknown_body) = app
        .post_json("/auth/forgot-password", json!({ "email": "fake@example.com" }))
        .await;

    assert_eq!(known_status, StatusCode::OK);
    assert_eq!(unknown_status, StatusCode::OK);
    assert_eq!(known_body, unknown_body);

    assert!(app.notifier.last_to("fake@example.com").is_none());
    let sent = app.notifier.last_to("real@example.com").unwrap();
    assert_eq!(sent.subject, "Your password reset code");
}

#[tokio::test]
async fn test_forgot_password_hides_delivery_failure() {
    let app = TestApp::spawn();
    app.register_verified("bounce@example.com").await;
    app.notifier.set_failing(true);

    let (status, body) = app
        .post_json(
            "/auth/forgot-password",
            json!({ "email": "bounce@example.com" }),
        )
        .await;
    let (_, unknown_body) = app
        .post_json("/auth/forgot-password", json!({ "email": "no@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, unknown_body);
}

#[tokio::test]
async fn test_reset_with_code_changes_password_and_revokes_sessions() {
    let app = TestApp::spawn();
    let email = "reset@example.com";
    let user_id = app.register_verified(email).await;
    let first = app.login(email).await;
    app.login(email).await;
    assert_eq!(app.store.live_session_count(user_id), 2);

    app.post_json("/auth/forgot-password", json!({ "email": email }))
        .await;
    let code = app.latest_otp(email);

    let (status, _) = app
        .post_json(
            "/auth/reset-password",
            json!({ "email": email, "otp": code, "new_password": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.live_session_count(user_id), 0);

    let (status, _) = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": first["refresh_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(
        login_status(&app, email, TEST_PASSWORD).await,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(login_status(&app, email, NEW_PASSWORD).await, StatusCode::OK);

    // The reset code was consumed.
    let (status, _) = app
        .post_json(
            "/auth/reset-password",
            json!({ "email": email, "otp": code, "new_password": "yet-another-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_with_expired_code_is_rejected() {
    let app = TestApp::spawn();
    let email = "expired-reset@example.com";
    let user_id = app.register_verified(email).await;

    app.post_json("/auth/forgot-password", json!({ "email": email }))
        .await;
    let code = app.latest_otp(email);
    app.store.set_otp_expiry(
        user_id,
        OtpPurpose::ResetPassword,
        Utc::now() - Duration::seconds(1),
    );

    let (status, body) = app
        .post_json(
            "/auth/reset-password",
            json!({ "email": email, "otp": code, "new_password": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired OTP");
    assert_eq!(login_status(&app, email, TEST_PASSWORD).await, StatusCode::OK);
}

#[tokio::test]
async fn test_reset_rejects_short_new_password() {
    let app = TestApp::spawn();

    let (status, _) = app
        .post_json(
            "/auth/reset-password",
            json!({ "email": "a@example.com", "otp": "123456", "new_password": "short" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_reset_link_has_configured_shape() {
    let app = TestApp::spawn();
    let email = "link@example.com";
    app.register_verified(email).await;

    let (status, _) = app
        .post_json("/auth/password-reset/request", json!({ "email": email }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let sent = app.notifier.last_to(email).unwrap();
    assert_eq!(sent.subject, "Reset your password");
    assert!(sent
        .body
        .contains("https://app.example.com/reset-password?token="));

    let token = app.latest_reset_token(email);
    assert_eq!(token.len(), 43);
}

#[tokio::test]
async fn test_reset_link_is_single_use() {
    let app = TestApp::spawn();
    let email = "once@example.com";
    let user_id = app.register_verified(email).await;
    app.login(email).await;

    app.post_json("/auth/password-reset/request", json!({ "email": email }))
        .await;
    let token = app.latest_reset_token(email);

    let (status, _) = app
        .post_json(
            "/auth/password-reset/confirm",
            json!({ "token": token, "new_password": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.live_session_count(user_id), 0);
    assert_eq!(login_status(&app, email, NEW_PASSWORD).await, StatusCode::OK);

    let (status, body) = app
        .post_json(
            "/auth/password-reset/confirm",
            json!({ "token": token, "new_password": "yet-another-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired token");
    assert_eq!(login_status(&app, email, NEW_PASSWORD).await, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_reset_link_token_is_rejected() {
    let app = TestApp::spawn();

    let (status, body) = app
        .post_json(
            "/auth/password-reset/confirm",
            json!({ "token": "definitely-not-issued", "new_password": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired token");
}

#[tokio::test]
async fn test_reset_link_request_does_not_leak_existence() {
    let app = TestApp::spawn();
    app.register_verified("present@example.com").await;

    let (_, known) = app
        .post_json(
            "/auth/password-reset/request",
            json!({ "email": "present@example.com" }),
        )
        .await;
    let (status, unknown) = app
        .post_json(
            "/auth/password-reset/request",
            json!({ "email": "absent@example.com" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(known, unknown);
    assert!(app.notifier.last_to("absent@example.com").is_none());
}
