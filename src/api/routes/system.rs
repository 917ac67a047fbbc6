//! System handlers: health, cleanup, OpenAPI.

use super::CleanupResponse;
use crate::api::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": if state.exporter.is_shutting_down() { "shutting_down" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "active_downloads": state.exporter.downloads().active_count(),
    }))
}

/// POST /cleanup - Sweep expired export state
#[utoipa::path(
    post,
    path = "/api/v1/cleanup",
    tag = "system",
    responses(
        (status = 200, description = "Expired entries removed", body = CleanupResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn cleanup(State(state): State<AppState>) -> Response {
    match state.exporter.cleanup().await {
        Ok(removed) => (StatusCode::OK, Json(CleanupResponse { removed })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
