//! REST API server module
//!
//! Exposes the export pipeline over HTTP: starting exports with a live
//! progress stream, polling task status, and downloading archives.

use crate::{Config, Exporter, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Exports
/// - `POST /exports` - Start an export (SSE progress stream) or reuse a recent one (JSON)
/// - `GET /exports/:task_id` - Current status snapshot
/// - `GET /export/:task_id` - Stream the ZIP archive of a ready task
/// - `HEAD /export/:task_id` - Archive headers, with `Content-Length` once known
///
/// ## System
/// - `GET /health` - Health check
/// - `POST /cleanup` - Sweep expired export state
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(exporter: Arc<Exporter>, config: Arc<Config>) -> Router {
    let state = AppState::new(exporter, config.clone());

    let router = Router::new()
        // Exports
        .route("/exports", post(routes::create_export))
        .route("/exports/:task_id", get(routes::get_export))
        // An explicit HEAD handler keeps HEAD from starting a download
        .route(
            "/export/:task_id",
            get(routes::download_export).head(routes::head_export),
        )
        // System
        .route("/health", get(routes::health_check))
        .route("/cleanup", post(routes::cleanup))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api/v1/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the exporter begins shutting down or the listener fails.
///
/// # Example
///
/// ```no_run
/// use gallery_export::{Exporter, Config};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let exporter = Arc::new(Exporter::new((*config).clone()).await?);
///
/// gallery_export::api::start_api_server(exporter, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(exporter: Arc<Exporter>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(exporter.clone(), config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { exporter.wait_for_shutdown().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
