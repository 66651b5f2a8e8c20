use service_core::axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::ApiDoc;

/// OpenAPI document for this service
#[utoipa::path(
    get,
    path = "/.well-known/openapi.json",
    responses(
        (status = 200, description = "OpenAPI document")
    ),
    tag = "Well-Known"
)]
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
