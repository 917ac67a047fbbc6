//! Archive streaming
//!
//! [`ArchiveStreamer::start`] replays a ready task's staged chunks, fetches
//! every asset with bounded retry and batch concurrency, and streams a ZIP
//! archive through a bounded channel. The download is the task's only active
//! one: a newer request for the same task cancels it, as does the receiving
//! side going away. Per-asset failures are counted and skipped.
//!
//! ## Submodules
//!
//! - [`naming`] - Entry names inside the archive
//! - [`registry`] - Active download per task
//! - [`phase`] - Download lifecycle
//! - [`fetch`] - Asset fetching

use crate::Result;
use crate::chunks::ChunkStore;
use crate::config::ExportConfig;
use crate::status::{StatusPublisher, load_snapshot};
use crate::store::KvStore;
use crate::types::{ImageRecord, SnapshotUpdate, StatusSnapshot, TaskId, TaskStatus};
use crate::Error;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod fetch;
pub mod naming;
pub mod phase;
pub mod registry;
mod writer;

pub use fetch::{AssetFetcher, FetchedAsset, HttpAssetFetcher};
pub use phase::{ArchivePhase, CloseReason};
pub use registry::{ActiveDownload, DownloadLease, DownloadRegistry};
pub use writer::ArchiveChunk;

use naming::{EntryNames, resolve_extension};
use writer::{Delivery, ZipSink};

/// Headers for a download response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHead {
    /// Archive filename
    pub filename: String,
    /// Byte count of the last complete run, if any
    pub content_length: Option<u64>,
}

/// Counters for a finished archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Bytes delivered
    pub bytes: u64,
    /// Primary image entries written
    pub images: usize,
    /// Thumbnail entries written
    pub thumbnails: usize,
    /// Primary assets that could not be fetched
    pub failed: usize,
    /// Titles whose thumbnail was requested but unavailable
    pub missing_thumbnail_titles: Vec<String>,
}

/// How a download ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Central directory written and delivered
    Completed(ArchiveSummary),
    /// Client went away or the download was superseded
    Aborted,
}

/// A running download
pub struct ArchiveDownload {
    /// Archive filename
    pub filename: String,
    /// Byte count of the last complete run, if any
    pub content_length: Option<u64>,
    /// Archive bytes; ends early on abort, with an error item on failure
    pub body: mpsc::Receiver<ArchiveChunk>,
    /// Resolves when the download ends
    pub handle: JoinHandle<Result<StreamOutcome>>,
}

/// Outcome of the optional thumbnail fetch for one record
enum Thumbnail {
    NotRequested,
    Fetched(FetchedAsset),
    Missing,
}

/// Assets fetched for one record
struct FetchedRecord {
    primary: Result<FetchedAsset>,
    thumbnail: Thumbnail,
}

/// Builds and streams archives for ready tasks
#[derive(Clone)]
pub struct ArchiveStreamer {
    store: Arc<dyn KvStore>,
    chunks: ChunkStore,
    assets: Arc<dyn AssetFetcher>,
    registry: DownloadRegistry,
    config: ExportConfig,
}

impl ArchiveStreamer {
    /// Streamer over the shared store
    pub fn new(
        store: Arc<dyn KvStore>,
        chunks: ChunkStore,
        assets: Arc<dyn AssetFetcher>,
        registry: DownloadRegistry,
        config: ExportConfig,
    ) -> Self {
        Self {
            store,
            chunks,
            assets,
            registry,
            config,
        }
    }

    /// Active download registry
    pub fn registry(&self) -> &DownloadRegistry {
        &self.registry
    }

    async fn ready_snapshot(&self, task_id: &TaskId) -> Result<StatusSnapshot> {
        let snapshot = load_snapshot(self.store.as_ref(), task_id)
            .await?
            .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
        if snapshot.status() != TaskStatus::Ready {
            return Err(Error::TaskNotReady {
                task_id: task_id.to_string(),
                status: snapshot.status().to_string(),
            });
        }
        Ok(snapshot)
    }

    /// Headers a download of `task_id` would carry
    ///
    /// `content_length` is the size of the last completed run. The first run
    /// clears the metadata chunks, so later runs fall back to lean records in
    /// `metadata.json` and can differ in size until they complete and record
    /// their own length.
    pub async fn head(&self, task_id: &TaskId) -> Result<DownloadHead> {
        let snapshot = self.ready_snapshot(task_id).await?;
        Ok(DownloadHead {
            filename: snapshot.task.filename,
            content_length: snapshot.task.final_size_bytes,
        })
    }

    /// Start streaming the archive of a ready task
    ///
    /// Any download already running for the task is cancelled.
    pub async fn start(&self, task_id: &TaskId) -> Result<ArchiveDownload> {
        let snapshot = self.ready_snapshot(task_id).await?;
        let lease = self.registry.register(task_id);
        let (tx, rx) = mpsc::channel(self.config.output_buffer.max(1));

        tracing::info!(
            task_id = %task_id,
            connection_id = lease.connection_id(),
            total_images = snapshot.task.total_images,
            "Archive download started"
        );

        let filename = snapshot.task.filename.clone();
        let content_length = snapshot.task.final_size_bytes;
        let streamer = self.clone();
        let handle = tokio::spawn(async move { streamer.run(lease, snapshot, tx).await });

        Ok(ArchiveDownload {
            filename,
            content_length,
            body: rx,
            handle,
        })
    }

    async fn run(
        &self,
        lease: DownloadLease,
        snapshot: StatusSnapshot,
        tx: mpsc::Sender<ArchiveChunk>,
    ) -> Result<StreamOutcome> {
        let task_id = snapshot.task.id.clone();
        let mut phase = ArchivePhase::Idle;
        phase.advance(ArchivePhase::Locking);

        let error_tx = tx.clone();
        let result = self.stream(&lease, &snapshot, tx, &mut phase).await;

        match &result {
            Ok(StreamOutcome::Completed(summary)) => {
                phase.advance(ArchivePhase::Closed(CloseReason::Success));
                tracing::info!(
                    task_id = %task_id,
                    bytes = summary.bytes,
                    images = summary.images,
                    thumbnails = summary.thumbnails,
                    failed = summary.failed,
                    "Archive download complete"
                );
                self.record_completion(&task_id, summary).await;
            }
            Ok(StreamOutcome::Aborted) => {
                phase.advance(ArchivePhase::Closed(CloseReason::Aborted));
                tracing::info!(
                    task_id = %task_id,
                    connection_id = lease.connection_id(),
                    superseded = lease.is_cancelled(),
                    "Archive download aborted"
                );
            }
            Err(e) => {
                phase.advance(ArchivePhase::Closed(CloseReason::Error));
                tracing::error!(task_id = %task_id, error = %e, "Archive download failed");
                let _ = error_tx.send(Err(std::io::Error::other(e.to_string()))).await;
            }
        }

        result
    }

    async fn stream(
        &self,
        lease: &DownloadLease,
        snapshot: &StatusSnapshot,
        tx: mpsc::Sender<ArchiveChunk>,
        phase: &mut ArchivePhase,
    ) -> Result<StreamOutcome> {
        let task = &snapshot.task;

        // Give a superseding request or a quick disconnect a chance before
        // any upstream traffic
        tokio::select! {
            _ = lease.token().cancelled() => return Ok(StreamOutcome::Aborted),
            _ = tx.closed() => return Ok(StreamOutcome::Aborted),
            _ = tokio::time::sleep(self.config.grace_delay) => {}
        }

        let mut sink = ZipSink::new(tx, self.config.compression_level);
        let aborted = |sink: &ZipSink| lease.is_cancelled() || sink.is_closed();

        if task.options.include_metadata {
            phase.advance(ArchivePhase::MetadataWrite);
            let records = self.chunks.load_metadata(&task.id).await?;
            let json = serde_json::to_vec_pretty(&records)?;
            drop(records);

            if aborted(&sink)
                || sink.add_entry("metadata.json", task.created_at, &json).await?
                    == Delivery::Closed
            {
                return Ok(StreamOutcome::Aborted);
            }
            if let Err(e) = self.chunks.clear_metadata_chunks(&task.id).await {
                tracing::warn!(task_id = %task.id, error = %e, "Failed to clear metadata chunks");
            }
        }

        phase.advance(ArchivePhase::ImageStreaming);
        let mut names = EntryNames::new();
        let mut summary = ArchiveSummary::default();
        let batch_size = self.config.batch_size.max(1);
        let mut first_batch = true;

        let mut chunks = self.chunks.chunks(&task.id);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            for batch in chunk.chunks(batch_size) {
                if !first_batch {
                    tokio::time::sleep(self.config.inter_batch_delay).await;
                }
                first_batch = false;

                if aborted(&sink) {
                    return Ok(StreamOutcome::Aborted);
                }

                let fetched = futures::future::join_all(
                    batch
                        .iter()
                        .map(|record| self.fetch_record(record, task.options.include_thumbnails)),
                )
                .await;

                for (record, assets) in batch.iter().zip(fetched) {
                    if aborted(&sink) {
                        return Ok(StreamOutcome::Aborted);
                    }
                    if self
                        .write_record(&mut sink, &mut names, &mut summary, record, assets)
                        .await?
                        == Delivery::Closed
                    {
                        return Ok(StreamOutcome::Aborted);
                    }
                }
            }
        }

        phase.advance(ArchivePhase::Finalizing);
        if aborted(&sink) {
            return Ok(StreamOutcome::Aborted);
        }
        let (delivery, bytes) = sink.finish().await?;
        if delivery == Delivery::Closed {
            return Ok(StreamOutcome::Aborted);
        }

        summary.bytes = bytes;
        Ok(StreamOutcome::Completed(summary))
    }

    async fn fetch_record(&self, record: &ImageRecord, with_thumbnail: bool) -> FetchedRecord {
        let primary = fetch::fetch_with_retry(
            self.assets.as_ref(),
            &record.url,
            self.config.asset_timeout,
            &self.config.asset_retry,
        );

        let thumbnail_url = record
            .thumbnail_url
            .as_deref()
            .filter(|url| *url != record.url);
        let thumbnail = async {
            if !with_thumbnail {
                return Thumbnail::NotRequested;
            }
            match thumbnail_url {
                // Same asset as the primary; nothing extra to add
                None if record.thumbnail_url.is_some() => Thumbnail::NotRequested,
                None => Thumbnail::Missing,
                Some(url) => match fetch::fetch_with_retry(
                    self.assets.as_ref(),
                    url,
                    self.config.thumbnail_timeout,
                    &self.config.asset_retry,
                )
                .await
                {
                    Ok(asset) => Thumbnail::Fetched(asset),
                    Err(e) => {
                        tracing::debug!(id = %record.id, error = %e, "Thumbnail unavailable");
                        Thumbnail::Missing
                    }
                },
            }
        };

        let (primary, thumbnail) = futures::join!(primary, thumbnail);
        FetchedRecord { primary, thumbnail }
    }

    async fn write_record(
        &self,
        sink: &mut ZipSink,
        names: &mut EntryNames,
        summary: &mut ArchiveSummary,
        record: &ImageRecord,
        assets: FetchedRecord,
    ) -> Result<Delivery> {
        match assets.primary {
            Ok(asset) => {
                let ext = resolve_extension(&record.url, asset.content_type.as_deref());
                let name = names.image(record, &ext);
                if sink.add_entry(&name, record.created_at, &asset.data).await? == Delivery::Closed {
                    return Ok(Delivery::Closed);
                }
                summary.images += 1;
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(id = %record.id, error = %e, "Skipping image after retries");
            }
        }

        match assets.thumbnail {
            Thumbnail::NotRequested => {}
            Thumbnail::Missing => summary.missing_thumbnail_titles.push(record.title.clone()),
            Thumbnail::Fetched(asset) => {
                let url = record.thumbnail_url.as_deref().unwrap_or(&record.url);
                let ext = resolve_extension(url, asset.content_type.as_deref());
                let name = names.thumbnail(record, &ext);
                if sink.add_entry(&name, record.created_at, &asset.data).await? == Delivery::Closed {
                    return Ok(Delivery::Closed);
                }
                summary.thumbnails += 1;
            }
        }

        Ok(Delivery::Sent)
    }

    async fn record_completion(&self, task_id: &TaskId, summary: &ArchiveSummary) {
        let mut publisher = StatusPublisher::new(self.store.clone(), self.config.snapshot_ttl);
        let update = SnapshotUpdate::default()
            .final_size_bytes(summary.bytes)
            .missing_thumbnail_titles(summary.missing_thumbnail_titles.clone());
        if let Err(e) = publisher.update(task_id, update).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to record archive size");
        }
    }
}
