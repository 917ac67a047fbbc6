//! Error types for gallery-export
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (validation, upstream, storage, archive)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for gallery-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gallery-export
///
/// Job-level failures (storage, upstream auth, empty collections) move an export
/// task to `failed`. Per-asset failures are counted by the archive streamer and
/// never surface through this type to the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input rejected before any work starts
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "export.chunk_size")
        key: Option<String>,
    },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("storage error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Upstream rejected the credential
    #[error("upstream rejected credential (HTTP {status})")]
    UpstreamAuth {
        /// HTTP status returned by the image source
        status: u16,
    },

    /// Upstream asked us to slow down (429) or returned a transient 403
    #[error("upstream rate limited (HTTP {status})")]
    UpstreamRateLimit {
        /// HTTP status returned by the image source
        status: u16,
    },

    /// Upstream is temporarily unavailable (5xx)
    #[error("upstream unavailable (HTTP {status})")]
    UpstreamUnavailable {
        /// HTTP status returned by the image source
        status: u16,
    },

    /// Metadata discovery failed for good
    #[error("fetch error: {0}")]
    Fetch(String),

    /// A single asset could not be fetched
    #[error("asset fetch failed for {url}: {reason}")]
    AssetFetch {
        /// The asset URL
        url: String,
        /// What went wrong
        reason: String,
        /// Whether another attempt could succeed
        retryable: bool,
    },

    /// Export task not found (or expired)
    #[error("export not found: {0}")]
    NotFound(String),

    /// Export task exists but has no archive to offer yet
    #[error("export {task_id} is not ready (status: {status})")]
    TaskNotReady {
        /// The task that was requested
        task_id: String,
        /// Its current status
        status: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ZIP encoding error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Shutdown in progress - not accepting new exports
    #[error("shutdown in progress: not accepting new exports")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a storage failure (fatal for a task)
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Sqlx(_))
    }
}

/// Storage-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt record {key}: {reason}")]
    Corrupt {
        /// The key whose value could not be decoded
        key: String,
        /// Decoder message
        reason: String,
    },

    /// A chunk inside the recorded range is missing
    #[error("chunk {index} of export {task_id} is missing")]
    MissingChunk {
        /// The export task
        task_id: String,
        /// The missing chunk index
        index: usize,
    },
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "export not found: exp_123",
///     "details": { "task_id": "exp_123" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Validation(_) => 400,
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - archive requested before the list is staged
            Error::TaskNotReady { .. } => 409,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Archive(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - Upstream errors
            Error::UpstreamAuth { .. } => 502,
            Error::Fetch(_) => 502,
            Error::AssetFetch { .. } => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::UpstreamRateLimit { .. } => 503,
            Error::UpstreamUnavailable { .. } => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Config { .. } => "config_error",
            Error::Database(e) => match e {
                DatabaseError::MissingChunk { .. } => "missing_chunk",
                _ => "storage_error",
            },
            Error::Sqlx(_) => "storage_error",
            Error::UpstreamAuth { .. } => "upstream_auth_error",
            Error::UpstreamRateLimit { .. } => "upstream_rate_limited",
            Error::UpstreamUnavailable { .. } => "upstream_unavailable",
            Error::Fetch(_) => "fetch_error",
            Error::AssetFetch { .. } => "asset_fetch_error",
            Error::NotFound(_) => "not_found",
            Error::TaskNotReady { .. } => "not_ready",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Archive(_) => "archive_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::NotFound(task_id) => Some(serde_json::json!({
                "task_id": task_id,
            })),
            Error::TaskNotReady { task_id, status } => Some(serde_json::json!({
                "task_id": task_id,
                "status": status,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            Error::UpstreamAuth { status }
            | Error::UpstreamRateLimit { status }
            | Error::UpstreamUnavailable { status } => {
                Some(serde_json::json!({
                    "upstream_status": status,
                }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
