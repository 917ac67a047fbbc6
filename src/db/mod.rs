//! Database layer for gallery-export
//!
//! SQLite persistence behind the [`KvStore`](crate::store::KvStore) seam. Every
//! export record (snapshots, recent-ready markers, staged chunks) lives in a
//! single `kv_entries` table with a millisecond expiry column.
//!
//! ## Submodules
//!
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`kv`] - Key-value operations and the expiry sweep

use sqlx::sqlite::SqlitePool;

mod kv;
mod migrations;

/// Database handle for gallery-export
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}
