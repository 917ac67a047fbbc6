//! Chunked staging of discovered image lists
//!
//! A task's image list is split into fixed-size chunks addressed by
//! [`ChunkKey`] and written through any [`KvStore`]. Two parallel series exist:
//! lean image chunks (raw upstream blob stripped) used to drive the archive, and
//! optional metadata chunks carrying the full records for `metadata.json`.
//!
//! Reading is lazy and non-mutating, so an archive can be rebuilt as often as
//! the chunks live.

use crate::config::ExportConfig;
use crate::error::DatabaseError;
use crate::store::{self, KvStore, WriteBatch, keys};
use crate::types::{ExportOptions, ImageRecord, TaskId};
use crate::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which parallel chunk series a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkSeries {
    /// Lean records driving the archive
    Images,
    /// Full records for `metadata.json`
    Metadata,
}

impl ChunkSeries {
    fn as_str(self) -> &'static str {
        match self {
            ChunkSeries::Images => "images",
            ChunkSeries::Metadata => "metadata",
        }
    }
}

/// Address of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    /// Owning task
    pub task_id: TaskId,
    /// Series
    pub series: ChunkSeries,
    /// Position in the series (0-based)
    pub index: usize,
}

impl ChunkKey {
    /// Key of an image chunk
    pub fn images(task_id: &TaskId, index: usize) -> Self {
        Self {
            task_id: task_id.clone(),
            series: ChunkSeries::Images,
            index,
        }
    }

    /// Key of a metadata chunk
    pub fn metadata(task_id: &TaskId, index: usize) -> Self {
        Self {
            task_id: task_id.clone(),
            series: ChunkSeries::Metadata,
            index,
        }
    }

    /// Prefix shared by every chunk of a series
    pub fn series_prefix(task_id: &TaskId, series: ChunkSeries) -> String {
        format!("{}{}:", keys::chunk_prefix(task_id), series.as_str())
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            Self::series_prefix(&self.task_id, self.series),
            self.index
        )
    }
}

/// Stored alongside the chunks of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Number of chunks in each series
    pub chunk_count: usize,
    /// Number of records across all chunks
    pub total_images: usize,
    /// Maximum records per chunk
    pub chunk_size: usize,
    /// Whether a metadata series was written
    pub has_metadata: bool,
}

/// Splits, persists and replays image lists
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn KvStore>,
    chunk_size: usize,
    flush_every: usize,
    chunk_ttl: Duration,
    metadata_ttl: Duration,
}

impl ChunkStore {
    /// Chunk store over `store` using the export settings
    pub fn new(store: Arc<dyn KvStore>, config: &ExportConfig) -> Self {
        Self {
            store,
            chunk_size: config.chunk_size.max(1),
            flush_every: config.flush_every.max(1),
            chunk_ttl: config.chunk_ttl,
            metadata_ttl: config.metadata_chunk_ttl,
        }
    }

    /// Persist `images` as ordered chunks
    ///
    /// Writes are committed every `flush_every` chunks. The descriptor goes into
    /// the last commit, so a reader never sees a descriptor before its chunks.
    pub async fn persist(
        &self,
        task_id: &TaskId,
        images: &[ImageRecord],
        options: &ExportOptions,
    ) -> Result<ChunkDescriptor> {
        let descriptor = ChunkDescriptor {
            chunk_count: images.len().div_ceil(self.chunk_size),
            total_images: images.len(),
            chunk_size: self.chunk_size,
            has_metadata: options.include_metadata,
        };

        let mut batch = WriteBatch::new();
        let mut commits = 0usize;
        for (index, chunk) in images.chunks(self.chunk_size).enumerate() {
            let lean: Vec<ImageRecord> = chunk.iter().map(ImageRecord::lean).collect();
            batch.put_json(
                ChunkKey::images(task_id, index).to_string(),
                &lean,
                self.chunk_ttl,
            )?;
            if options.include_metadata {
                batch.put_json(
                    ChunkKey::metadata(task_id, index).to_string(),
                    &chunk,
                    self.metadata_ttl,
                )?;
            }

            if (index + 1) % self.flush_every == 0 {
                self.store.commit(std::mem::take(&mut batch)).await?;
                commits += 1;
            }
        }

        batch.put_json(keys::chunk_descriptor(task_id), &descriptor, self.chunk_ttl)?;
        self.store.commit(batch).await?;
        commits += 1;

        tracing::debug!(
            task_id = %task_id,
            chunks = descriptor.chunk_count,
            total = descriptor.total_images,
            commits,
            "Persisted image chunks"
        );

        Ok(descriptor)
    }

    /// Descriptor of a task's chunks, if they are still stored
    pub async fn descriptor(&self, task_id: &TaskId) -> Result<Option<ChunkDescriptor>> {
        store::get_json(self.store.as_ref(), &keys::chunk_descriptor(task_id)).await
    }

    /// Replay the image series chunk by chunk, in index order
    pub fn chunks(&self, task_id: &TaskId) -> BoxStream<'static, Result<Vec<ImageRecord>>> {
        let state = (self.clone(), task_id.clone(), None::<usize>, 0usize);
        stream::try_unfold(state, |(chunks, task_id, count, index)| async move {
            let count = match count {
                Some(count) => count,
                None => chunks.require_descriptor(&task_id).await?.chunk_count,
            };
            if index >= count {
                return Ok::<_, Error>(None);
            }
            let chunk = chunks.read_chunk(&ChunkKey::images(&task_id, index)).await?;
            Ok(Some((chunk, (chunks, task_id, Some(count), index + 1))))
        })
        .boxed()
    }

    /// Replay the image series record by record
    pub fn load(&self, task_id: &TaskId) -> BoxStream<'static, Result<ImageRecord>> {
        self.chunks(task_id)
            .map_ok(|chunk| stream::iter(chunk.into_iter().map(Ok::<_, Error>)))
            .try_flatten()
            .boxed()
    }

    /// Full records for `metadata.json`
    ///
    /// Falls back to the lean image series when the metadata series was never
    /// written or has already been cleared.
    pub async fn load_metadata(&self, task_id: &TaskId) -> Result<Vec<ImageRecord>> {
        let descriptor = self.require_descriptor(task_id).await?;
        let first = ChunkKey::metadata(task_id, 0).to_string();
        let has_series = descriptor.has_metadata
            && descriptor.chunk_count > 0
            && self.store.get(&first).await?.is_some();

        if !has_series {
            return self.load(task_id).try_collect().await;
        }

        let mut records = Vec::with_capacity(descriptor.total_images);
        for index in 0..descriptor.chunk_count {
            records.extend(self.read_chunk(&ChunkKey::metadata(task_id, index)).await?);
        }
        Ok(records)
    }

    /// Drop the metadata series once it has been written out
    pub async fn clear_metadata_chunks(&self, task_id: &TaskId) -> Result<u64> {
        let removed = self
            .store
            .delete_prefix(&ChunkKey::series_prefix(task_id, ChunkSeries::Metadata))
            .await?;
        tracing::debug!(task_id = %task_id, removed, "Cleared metadata chunks");
        Ok(removed)
    }

    async fn require_descriptor(&self, task_id: &TaskId) -> Result<ChunkDescriptor> {
        self.descriptor(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(task_id.to_string()))
    }

    async fn read_chunk(&self, key: &ChunkKey) -> Result<Vec<ImageRecord>> {
        store::get_json(self.store.as_ref(), &key.to_string())
            .await?
            .ok_or_else(|| {
                DatabaseError::MissingChunk {
                    task_id: key.task_id.to_string(),
                    index: key.index,
                }
                .into()
            })
    }
}
