//! Key-value storage seam
//!
//! Everything an export needs to survive between requests (status snapshots,
//! recent-ready records, staged chunks) goes through [`KvStore`]. Values are
//! JSON strings with a per-entry time-to-live; expired entries are invisible to
//! readers even before [`KvStore::sweep_expired`] removes them.
//!
//! [`crate::db::Database`] is the SQLite implementation.

use crate::Result;
use crate::error::DatabaseError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Key layout shared by the modules that read and write exports
pub mod keys {
    use crate::types::TaskId;

    /// Status snapshot of a task
    pub fn snapshot(task_id: &TaskId) -> String {
        format!("export:{}", task_id)
    }

    /// Recent-ready record for a requester and scope
    pub fn recent(fingerprint: &str, scope: &str) -> String {
        format!("export_recent:{}:{}", fingerprint, scope)
    }

    /// Chunk descriptor of a task
    pub fn chunk_descriptor(task_id: &TaskId) -> String {
        format!("export_chunks:{}", task_id)
    }

    /// Prefix shared by every chunk of a task
    pub fn chunk_prefix(task_id: &TaskId) -> String {
        format!("export_chunk:{}:", task_id)
    }
}

/// One operation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a value
    Put {
        /// Entry key
        key: String,
        /// Serialized value
        value: String,
        /// Time until the entry expires
        ttl: Duration,
    },
    /// Remove a value
    Delete {
        /// Entry key
        key: String,
    },
}

/// A group of writes applied atomically by [`KvStore::commit`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
            ttl,
        });
    }

    /// Queue a JSON-encoded put
    pub fn put_json<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;
        self.put(key, value, ttl);
        Ok(())
    }

    /// Queue a delete
    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch into its operations
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Durable key-value engine with per-entry TTL
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a value (absent keys are not an error)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Apply every operation of the batch or none of them
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Remove every entry whose key starts with `prefix`, returning how many went
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Remove expired entries, returning how many went
    async fn sweep_expired(&self) -> Result<u64>;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw).map(Some).map_err(|e| {
        DatabaseError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Encode and write a JSON value
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw, ttl).await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;

    #[test]
    fn key_layout() {
        let id = TaskId::from("exp_1");
        assert_eq!(keys::snapshot(&id), "export:exp_1");
        assert_eq!(keys::recent("abcd", "default"), "export_recent:abcd:default");
        assert_eq!(keys::chunk_descriptor(&id), "export_chunks:exp_1");
        assert_eq!(keys::chunk_prefix(&id), "export_chunk:exp_1:");
    }

    #[test]
    fn batch_keeps_operation_order() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.put("a", "1", Duration::from_secs(1));
        batch.delete("b");
        batch
            .put_json("c", &vec![1, 2], Duration::from_secs(1))
            .unwrap();
        assert_eq!(batch.len(), 3);

        let ops = batch.into_ops();
        assert!(matches!(&ops[1], WriteOp::Delete { key } if key == "b"));
        assert!(matches!(&ops[2], WriteOp::Put { value, .. } if value == "[1,2]"));
    }
}
