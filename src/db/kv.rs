//! Key-value operations backing [`KvStore`].

use crate::error::DatabaseError;
use crate::store::{KvStore, WriteBatch, WriteOp};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::Database;

/// Current time in unix milliseconds
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Expiry timestamp for an entry written now
fn expiry_millis(now: i64, ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.saturating_add(ttl)
}

const UPSERT: &str = r#"
    INSERT INTO kv_entries (key, value, created_at, expires_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        created_at = excluded.created_at,
        expires_at = excluded.expires_at
"#;

#[async_trait]
impl KvStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(now_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read {}: {}",
                    key, e
                )))
            })
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = now_millis();
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(now)
            .bind(expiry_millis(now, ttl))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to write {}: {}",
                    key, e
                )))
            })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete {}: {}",
                    key, e
                )))
            })?;

        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let now = now_millis();
        for op in batch.into_ops() {
            let result = match &op {
                WriteOp::Put { key, value, ttl } => {
                    sqlx::query(UPSERT)
                        .bind(key)
                        .bind(value)
                        .bind(now)
                        .bind(expiry_millis(now, *ttl))
                        .execute(&mut *tx)
                        .await
                }
                WriteOp::Delete { key } => {
                    sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                }
            };
            // Dropping the transaction rolls it back
            result.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to apply batch operation: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit batch: {}",
                e
            )))
        })?;

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        // substr comparison avoids LIKE wildcards in keys
        let result = sqlx::query("DELETE FROM kv_entries WHERE substr(key, 1, ?) = ?")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete prefix {}: {}",
                    prefix, e
                )))
            })?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to sweep expired entries: {}",
                    e
                )))
            })?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired entries");
        }
        Ok(removed)
    }
}
