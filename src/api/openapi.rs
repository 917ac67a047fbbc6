//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the gallery-export REST API using
//! utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the gallery-export REST API
///
/// The spec can be accessed via:
/// - `/api/v1/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "gallery-export REST API",
        version = "0.1.0",
        description = "Stage a remote image collection and download it as a streamed ZIP archive",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790/api/v1", description = "Local development server")
    ),
    paths(
        // Exports
        crate::api::routes::create_export,
        crate::api::routes::get_export,
        crate::api::routes::download_export,
        crate::api::routes::head_export,

        // System
        crate::api::routes::health_check,
        crate::api::routes::cleanup,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::TaskStatus,
        crate::types::StageStatus,
        crate::types::MetadataStage,
        crate::types::ExportOptions,
        crate::types::ExportTask,
        crate::types::StatusSnapshot,
        crate::types::ExportRequest,
        crate::types::ExistingTaskDescriptor,
        crate::types::ExportEvent,
        crate::types::ImageRecord,

        // Config types from config.rs
        crate::config::Config,
        crate::config::UpstreamConfig,
        crate::config::ExportConfig,
        crate::config::RetryConfig,
        crate::config::PersistenceConfig,
        crate::config::ApiConfig,

        // API request/response types from routes
        crate::api::routes::CleanupResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "exports", description = "Exports - Start exports, follow progress, download archives"),
        (name = "system", description = "System endpoints - Health checks, cleanup, OpenAPI spec"),
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_lists_every_route() {
        let spec = ApiDoc::openapi();
        let paths = &spec.paths.paths;
        for path in [
            "/api/v1/exports",
            "/api/v1/exports/{task_id}",
            "/api/v1/export/{task_id}",
            "/api/v1/health",
            "/api/v1/cleanup",
            "/api/v1/openapi.json",
        ] {
            assert!(paths.contains_key(path), "missing path {}", path);
        }
    }

    #[test]
    fn spec_has_export_schemas() {
        let spec = ApiDoc::openapi();
        let components = spec.components.unwrap();
        for schema in ["ExportEvent", "StatusSnapshot", "ExistingTaskDescriptor", "ApiError"] {
            assert!(
                components.schemas.contains_key(schema),
                "missing schema {}",
                schema
            );
        }
    }

    #[test]
    fn create_export_documents_json_and_event_stream() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let content = &json["paths"]["/api/v1/exports"]["post"]["responses"]["200"]["content"];
        assert!(content["application/json"].is_object());
        assert!(content["text/event-stream"].is_object());
    }

    #[test]
    fn spec_serializes_as_openapi_3() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let version = json.get("openapi").and_then(|v| v.as_str()).unwrap();
        assert!(version.starts_with("3."));
    }
}
