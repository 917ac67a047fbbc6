//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`exports`] - Export creation, status and archive download
//! - [`system`] - Health, cleanup, OpenAPI

use serde::{Deserialize, Serialize};

mod exports;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use exports::*;
pub use system::*;

/// Response for POST /cleanup
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CleanupResponse {
    /// Expired entries removed
    pub removed: u64,
}
