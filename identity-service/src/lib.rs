pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod stores;
pub mod utils;

use service_core::axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};

use crate::config::{IdentityConfig, RateLimitConfig};
use crate::models::Role;
use crate::services::AuthService;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::well_known::openapi_json,
        handlers::auth::registration::register,
        handlers::auth::registration::verify_email,
        handlers::auth::registration::resend_verification,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::password::forgot_password,
        handlers::auth::password::reset_password,
        handlers::auth::password::request_password_reset,
        handlers::auth::password::confirm_password_reset,
        handlers::user::get_me,
        handlers::user::get_user,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::EmailRequest,
            dtos::auth::VerifyEmailRequest,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::TokenPairResponse,
            dtos::auth::ResetPasswordRequest,
            dtos::auth::ConfirmPasswordResetRequest,
            dtos::auth::MessageResponse,
            dtos::auth::OkResponse,
            models::UserResponse,
            models::Role,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, email verification and sessions"),
        (name = "Password", description = "Password reset by code or link"),
        (name = "Users", description = "User profiles"),
        (name = "Well-Known", description = "Public service metadata"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Per-IP limiters for the endpoints that are worth brute forcing.
#[derive(Clone)]
pub struct RateLimiters {
    pub login: IpRateLimiter,
    pub register: IpRateLimiter,
    pub password_reset: IpRateLimiter,
    pub otp_verify: IpRateLimiter,
    pub global: IpRateLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            login: create_ip_rate_limiter(config.login_attempts, config.login_window_seconds),
            register: create_ip_rate_limiter(
                config.register_attempts,
                config.register_window_seconds,
            ),
            password_reset: create_ip_rate_limiter(
                config.password_reset_attempts,
                config.password_reset_window_seconds,
            ),
            otp_verify: create_ip_rate_limiter(
                config.otp_verify_attempts,
                config.otp_verify_window_seconds,
            ),
            global: create_ip_rate_limiter(
                config.global_ip_limit,
                config.global_ip_window_seconds,
            ),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub auth_service: AuthService,
    pub rate_limiters: RateLimiters,
}

pub fn build_router(state: AppState) -> Router {
    let limiters = state.rate_limiters.clone();

    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(limiters.login, ip_rate_limit_middleware));

    let register_route = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route_layer(from_fn_with_state(
            limiters.register,
            ip_rate_limit_middleware,
        ));

    // Both reset channels share one quota.
    let reset_request_routes = Router::new()
        .route(
            "/auth/forgot-password",
            post(handlers::auth::forgot_password),
        )
        .route(
            "/auth/password-reset/request",
            post(handlers::auth::request_password_reset),
        )
        .route_layer(from_fn_with_state(
            limiters.password_reset,
            ip_rate_limit_middleware,
        ));

    // Routes that accept a guessed code.
    let otp_submit_routes = Router::new()
        .route("/auth/verify-email", post(handlers::auth::verify_email))
        .route("/auth/reset-password", post(handlers::auth::reset_password))
        .route_layer(from_fn_with_state(
            limiters.otp_verify,
            ip_rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/users/:id", get(handlers::user::get_user))
        .route_layer(from_fn_with_state(Role::Admin, middleware::require_role));

    let authenticated_routes = Router::new()
        .route("/users/me", get(handlers::user::get_me))
        .merge(admin_routes)
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors_origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(handlers::well_known::openapi_json),
        )
        .route(
            "/auth/verify-email/resend",
            post(handlers::auth::resend_verification),
        )
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/auth/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        )
        .merge(login_route)
        .merge(register_route)
        .merge(reset_request_routes)
        .merge(otp_submit_routes)
        .merge(authenticated_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(limiters.global, ip_rate_limit_middleware))
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Backing store unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.auth_service.store_ready().await {
        return Err(AppError::ServiceUnavailable);
    }

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}
