//! # gallery-export
//!
//! Bulk export pipeline for remotely hosted image collections.
//!
//! ## How an export works
//!
//! 1. A client asks for an export with its upstream credential. A recent ready
//!    export for the same credential and scope is handed back as-is.
//! 2. Otherwise a background job paginates the upstream image API, mirrors its
//!    progress to the client as events, and stages the discovered list in the
//!    SQLite-backed store as fixed-size chunks.
//! 3. Once the task is ready, a separate download request replays the chunks,
//!    fetches every image with bounded retry, and streams a ZIP archive back.
//!
//! All staged state carries a TTL; nothing is kept beyond it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gallery_export::{Config, ExportRequest, ExportResponse, Exporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.upstream.base_url = "https://images.example.com/api".to_string();
//!
//!     let exporter = Exporter::new(config).await?;
//!
//!     let request = ExportRequest {
//!         credential: "sk-live-0123456789abcdef".to_string(),
//!         scope: None,
//!         include_metadata: true,
//!         include_thumbnails: false,
//!     };
//!     if let ExportResponse::Started { mut events, .. } = exporter.request_export(request).await? {
//!         while let Some(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Archive streaming
pub mod archive;
/// Chunked staging of image lists
pub mod chunks;
/// Configuration types
pub mod config;
/// Export request entry point
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Exporter facade (owns every component)
pub mod exporter;
/// Upstream image listing
pub mod fetcher;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable task status and event mirroring
pub mod status;
/// Key-value store abstraction
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveDownload, DownloadHead, StreamOutcome};
pub use config::Config;
pub use coordinator::ExportResponse;
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus};
pub use exporter::Exporter;
pub use store::KvStore;
pub use types::{
    ExistingTaskDescriptor, ExportEvent, ExportOptions, ExportRequest, ExportTask, ImageRecord,
    StatusSnapshot, TaskId, TaskStatus,
};

/// Helper function to run the exporter with graceful signal handling.
///
/// Waits for a termination signal and then calls the exporter's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use gallery_export::{Exporter, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let exporter = Exporter::new(Config::default()).await?;
///     run_with_shutdown(exporter).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(exporter: Exporter) -> Result<()> {
    wait_for_signal().await;
    exporter.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
