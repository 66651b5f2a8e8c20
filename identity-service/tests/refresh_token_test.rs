mod common;

use axum::http::StatusCode;
use common::{test_config, TestApp};
use identity_service::services::metrics;
use serde_json::{json, Value};

async fn logged_in(app: &TestApp, email: &str) -> Value {
    app.register_verified(email).await;
    app.login(email).await
}

#[tokio::test]
async fn test_refresh_rotates_pair() {
    let app = TestApp::spawn();
    let login = logged_in(&app, "rotate@example.com").await;

    let (status, body) = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": login["refresh_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["access_token"], login["access_token"]);
    assert_ne!(body["refresh_token"], login["refresh_token"]);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["access_exp"].is_string());
    assert!(body["refresh_exp"].is_string());

    // The new refresh token is itself usable exactly once.
    let (status, _) = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": body["refresh_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_replay_is_rejected() {
    let app = TestApp::spawn();
    let login = logged_in(&app, "replay@example.com").await;
    let token = login["refresh_token"].clone();

    let (status, _) = app
        .post_json("/auth/refresh", json!({ "refresh_token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post_json("/auth/refresh", json!({ "refresh_token": token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Token revoked");
}

#[tokio::test]
async fn test_refresh_replay_is_counted_as_reuse() {
    let app = TestApp::spawn();
    let login = logged_in(&app, "reuse@example.com").await;
    let token = login["refresh_token"].clone();
    let reused = || {
        metrics::AUTH_EVENTS_TOTAL
            .get()
            .unwrap()
            .with_label_values(&["refresh", "reused"])
            .get()
    };

    app.post_json("/auth/refresh", json!({ "refresh_token": token }))
        .await;
    let before = reused();

    let (status, _) = app
        .post_json("/auth/refresh", json!({ "refresh_token": token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(reused() > before);
}

#[tokio::test]
async fn test_concurrent_refresh_has_single_winner() {
    let app = TestApp::spawn();
    let user_id = app.register_verified("race@example.com").await;
    let login = app.login("race@example.com").await;
    let token = login["refresh_token"].clone();

    let (a, b) = futures::join!(
        app.post_json("/auth/refresh", json!({ "refresh_token": token })),
        app.post_json("/auth/refresh", json!({ "refresh_token": token })),
    );

    let statuses = [a.0, b.0];
    let wins = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let losses = statuses
        .iter()
        .filter(|s| **s == StatusCode::UNAUTHORIZED)
        .count();
    assert_eq!(wins, 1, "statuses: {:?}", statuses);
    assert_eq!(losses, 1, "statuses: {:?}", statuses);
    assert_eq!(app.store.live_session_count(user_id), 1);
}

#[tokio::test]
async fn test_access_token_cannot_refresh() {
    let app = TestApp::spawn();
    let login = logged_in(&app, "cross@example.com").await;

    let (status, body) = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": login["access_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn test_refresh_token_is_not_a_bearer() {
    let app = TestApp::spawn();
    let login = logged_in(&app, "bearer@example.com").await;

    let (status, _) = app
        .get_with_bearer("/users/me", login["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_garbage_refresh_token_rejected() {
    let app = TestApp::spawn();

    let (status, body) = app
        .post_json("/auth/refresh", json!({ "refresh_token": "not.a.jwt" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn test_empty_refresh_token_fails_validation() {
    let app = TestApp::spawn();

    let (status, _) = app
        .post_json("/auth/refresh", json!({ "refresh_token": "" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_expired_refresh_token_rejected() {
    let mut config = test_config();
    config.jwt.refresh_token_expiry_days = -1;
    let app = TestApp::spawn_with(config);
    let login = logged_in(&app, "stale@example.com").await;

    let (status, body) = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": login["refresh_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn test_refresh_for_deactivated_account_rejected() {
    let app = TestApp::spawn();
    let user_id = app.register_verified("gone@example.com").await;
    let login = app.login("gone@example.com").await;
    app.store.set_user_active(user_id, false);

    let (status, _) = app
        .post_json(
            "/auth/refresh",
            json!({ "refresh_token": login["refresh_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.live_session_count(user_id), 0);
}

#[tokio::test]
async fn test_each_login_adds_a_session() {
    let app = TestApp::spawn();
    let user_id = app.register_verified("multi@example.com").await;

    let first = app.login("multi@example.com").await;
    let second = app.login("multi@example.com").await;
    assert_ne!(first["refresh_token"], second["refresh_token"]);
    assert_eq!(app.store.live_session_count(user_id), 2);
}
