mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::TestApp;
use http_body_util::BodyExt;
use serde_json::json;
use service_core::middleware::tracing::REQUEST_ID_HEADER;
use tower::util::ServiceExt;

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check_works() {
    let app = TestApp::spawn();

    let (status, body) = app.request(get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "identity-service-test");
    assert_eq!(body["checks"]["store"], "up");
}

#[tokio::test]
async fn test_responses_carry_security_headers_and_request_id() {
    let app = TestApp::spawn();

    let res = app.router.clone().oneshot(get("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");
    assert!(res.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::spawn();

    let req = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "req-identity-1")
        .body(Body::empty())
        .unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();

    assert_eq!(res.headers()[REQUEST_ID_HEADER], "req-identity-1");
}

#[tokio::test]
async fn test_metrics_exposes_auth_counters() {
    let app = TestApp::spawn();
    app.post_json(
        "/auth/login",
        json!({ "email": "metrics@example.com", "password": "whatever-password" }),
    )
    .await;

    let res = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("auth_events_total"));
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn test_openapi_document_lists_auth_paths() {
    let app = TestApp::spawn();

    let (status, body) = app.request(get("/.well-known/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/auth/register",
        "/auth/login",
        "/auth/refresh",
        "/auth/logout",
        "/auth/forgot-password",
        "/auth/password-reset/confirm",
        "/users/me",
    ] {
        assert!(paths.contains_key(path), "missing {}", path);
    }
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::spawn();

    let (status, _) = app.request(get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
