//! Export request entry point
//!
//! [`ExportCoordinator::request_export`] validates the credential, returns a
//! recent ready export for the same requester and scope when one exists, and
//! otherwise starts a background job: discover the image list, stage it as
//! chunks, mark the task ready. Progress of the job is mirrored to the returned
//! event channel.

use crate::archive::naming::sanitize_component;
use crate::chunks::ChunkStore;
use crate::config::ExportConfig;
use crate::fetcher::{FetchObserver, FetchProgress, MetadataFetcher};
use crate::status::{StatusPublisher, load_snapshot};
use crate::store::{self, KvStore, keys};
use crate::types::{
    ExistingTaskDescriptor, ExportEvent, ExportRequest, ExportTask, ImageRecord, MetadataStage,
    SnapshotUpdate, StageStatus, StatusSnapshot, TaskId, TaskStatus, normalize_scope,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of a job's event channel
const EVENT_BUFFER: usize = 32;

/// Outcome of an export request
#[derive(Debug)]
pub enum ExportResponse {
    /// A recent ready export was reused; no job was started
    Existing(ExistingTaskDescriptor),
    /// A new job is running
    Started {
        /// The new task
        task_id: TaskId,
        /// Job progress, ending with `download_ready` or `error`
        events: mpsc::Receiver<ExportEvent>,
    },
}

/// Marker pointing a requester and scope at their latest ready task
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecentExport {
    task_id: TaskId,
    ready_at: DateTime<Utc>,
}

/// Reject credentials that cannot be genuine before any upstream call
pub fn validate_credential(credential: &str, min_length: usize) -> Result<()> {
    if credential.is_empty() {
        return Err(Error::Validation("credential is required".to_string()));
    }
    if credential.chars().any(char::is_whitespace) {
        return Err(Error::Validation(
            "credential must not contain whitespace".to_string(),
        ));
    }
    if credential.chars().count() < min_length {
        return Err(Error::Validation(format!(
            "credential must be at least {} characters",
            min_length
        )));
    }
    Ok(())
}

/// Requester fingerprint: first 16 hex chars of SHA-256(credential)
pub fn fingerprint(credential: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(credential.as_bytes()));
    digest[..16].to_string()
}

/// Archive filename for a scope on a given day
pub fn archive_filename(scope: &str, date: DateTime<Utc>) -> String {
    format!(
        "images-export-{}-{}.zip",
        sanitize_component(scope, 40),
        date.format("%Y-%m-%d")
    )
}

/// Starts export jobs and answers reuse lookups
#[derive(Clone)]
pub struct ExportCoordinator {
    store: Arc<dyn KvStore>,
    fetcher: Arc<MetadataFetcher>,
    chunks: ChunkStore,
    config: ExportConfig,
    shutdown: CancellationToken,
}

impl ExportCoordinator {
    /// Coordinator over the shared store
    pub fn new(
        store: Arc<dyn KvStore>,
        fetcher: Arc<MetadataFetcher>,
        chunks: ChunkStore,
        config: ExportConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            chunks,
            config,
            shutdown,
        }
    }

    /// Download URL of a task
    pub fn download_url(&self, task_id: &TaskId) -> String {
        format!(
            "{}/{}",
            self.config.download_base_path.trim_end_matches('/'),
            task_id
        )
    }

    /// Handle a create-export request
    pub async fn request_export(&self, request: ExportRequest) -> Result<ExportResponse> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        validate_credential(&request.credential, self.config.min_credential_length)?;

        let scope = normalize_scope(request.scope.as_deref());
        let requester = fingerprint(&request.credential);

        if let Some(existing) = self.find_reusable(&requester, &scope).await? {
            tracing::info!(
                task_id = %existing.task_id,
                scope = %scope,
                age_seconds = existing.age_seconds,
                "Reusing recent export"
            );
            return Ok(ExportResponse::Existing(existing));
        }

        let now = Utc::now();
        let task = ExportTask {
            id: TaskId::generate(),
            requester,
            filename: archive_filename(&scope, now),
            scope,
            options: request.options(),
            status: TaskStatus::Preparing,
            total_images: 0,
            chunk_count: 0,
            created_at: now,
            final_size_bytes: None,
        };
        let task_id = task.id.clone();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut publisher = StatusPublisher::with_events(self.store.clone(), self.config.snapshot_ttl, tx);
        let snapshot = publisher.create(StatusSnapshot::preparing(task)).await?;

        tracing::info!(task_id = %task_id, scope = %snapshot.task.scope, "Export started");

        let coordinator = self.clone();
        let credential = request.credential;
        tokio::spawn(async move {
            coordinator.run_job(publisher, snapshot.task, credential).await;
        });

        Ok(ExportResponse::Started {
            task_id,
            events: rx,
        })
    }

    /// Recent ready export for this requester and scope, if still reusable
    pub async fn find_reusable(
        &self,
        requester: &str,
        scope: &str,
    ) -> Result<Option<ExistingTaskDescriptor>> {
        let recent: Option<RecentExport> =
            store::get_json(self.store.as_ref(), &keys::recent(requester, scope)).await?;
        let Some(recent) = recent else {
            return Ok(None);
        };
        let Some(snapshot) = load_snapshot(self.store.as_ref(), &recent.task_id).await? else {
            return Ok(None);
        };
        if snapshot.status() != TaskStatus::Ready {
            return Ok(None);
        }

        let age = Utc::now()
            .signed_duration_since(snapshot.task.created_at)
            .to_std()
            .unwrap_or_default();
        if age >= self.config.reuse_window {
            return Ok(None);
        }
        if self.chunks.descriptor(&snapshot.task.id).await?.is_none() {
            return Ok(None);
        }

        Ok(Some(ExistingTaskDescriptor {
            download_url: self.download_url(&snapshot.task.id),
            task_id: snapshot.task.id,
            filename: snapshot.task.filename,
            total_images: snapshot.task.total_images,
            age_seconds: age.as_secs(),
            reused: true,
        }))
    }

    async fn run_job(&self, mut publisher: StatusPublisher, task: ExportTask, credential: String) {
        let task_id = task.id.clone();
        if let Err(e) = self.execute(&mut publisher, &task, &credential).await {
            tracing::warn!(task_id = %task_id, error = %e, "Export failed");
            let message = match &e {
                Error::Fetch(message) => message.clone(),
                other => other.to_string(),
            };

            let mut update = SnapshotUpdate::default()
                .status(TaskStatus::Failed)
                .message("Export failed")
                .error(message.clone());
            if let Ok(Some(current)) = publisher.get(&task_id).await
                && current.metadata_stage.status != StageStatus::Completed
            {
                update = update.metadata_stage(MetadataStage {
                    status: StageStatus::Failed,
                    ..current.metadata_stage
                });
            }

            // A failed write has already ended the client stream
            if publisher.update(&task_id, update).await.is_ok() {
                publisher.finish(ExportEvent::error(message)).await;
            }
        }
    }

    async fn execute(
        &self,
        publisher: &mut StatusPublisher,
        task: &ExportTask,
        credential: &str,
    ) -> Result<()> {
        publisher
            .update(
                &task.id,
                SnapshotUpdate::default()
                    .status(TaskStatus::Running)
                    .message("Fetching image list")
                    .metadata_stage(MetadataStage {
                        status: StageStatus::Running,
                        ..MetadataStage::default()
                    }),
            )
            .await?;

        let (images, batches) = {
            let mut relay = ProgressRelay {
                publisher: &mut *publisher,
                task_id: &task.id,
                batches: 0,
            };
            let images = self
                .fetcher
                .fetch_all(credential, &task.scope, &mut relay)
                .await?;
            (images, relay.batches)
        };

        publisher
            .update(
                &task.id,
                SnapshotUpdate::default()
                    .message(format!("Staging {} images", images.len()))
                    .total_images(images.len())
                    .progress(95)
                    .metadata_stage(MetadataStage {
                        status: StageStatus::Completed,
                        progress: 100,
                        batch: batches,
                        count: images.len(),
                    }),
            )
            .await?;

        let missing_thumbnails = if task.options.include_thumbnails {
            titles_without_thumbnail(&images)
        } else {
            Vec::new()
        };
        let descriptor = self.chunks.persist(&task.id, &images, &task.options).await?;
        drop(images);

        let snapshot = publisher
            .update(
                &task.id,
                SnapshotUpdate::default()
                    .status(TaskStatus::Ready)
                    .message("Export ready")
                    .total_images(descriptor.total_images)
                    .chunk_count(descriptor.chunk_count)
                    .missing_thumbnail_titles(missing_thumbnails)
                    .progress(100),
            )
            .await?;

        let recent = RecentExport {
            task_id: task.id.clone(),
            ready_at: Utc::now(),
        };
        if let Err(e) = store::put_json(
            self.store.as_ref(),
            &keys::recent(&task.requester, &task.scope),
            &recent,
            self.config.reuse_window,
        )
        .await
        {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to record recent export");
        }

        tracing::info!(
            task_id = %task.id,
            total_images = descriptor.total_images,
            chunks = descriptor.chunk_count,
            "Export ready"
        );

        publisher
            .finish(ExportEvent::download_ready(
                &snapshot,
                self.download_url(&task.id),
            ))
            .await;
        Ok(())
    }
}

/// Titles of records the upstream listed without any thumbnail
///
/// Thumbnails that fail to download are only known once an archive is built.
fn titles_without_thumbnail(images: &[ImageRecord]) -> Vec<String> {
    images
        .iter()
        .filter(|record| record.thumbnail_url.is_none())
        .map(|record| record.title.clone())
        .collect()
}

/// Mirrors fetch progress into the task snapshot
struct ProgressRelay<'a> {
    publisher: &'a mut StatusPublisher,
    task_id: &'a TaskId,
    batches: usize,
}

#[async_trait]
impl FetchObserver for ProgressRelay<'_> {
    async fn on_page(&mut self, progress: FetchProgress) -> Result<()> {
        self.batches = progress.batch_index;
        self.publisher
            .update(
                self.task_id,
                SnapshotUpdate::default()
                    .message(format!("Found {} images", progress.cumulative_count))
                    .total_images(progress.cumulative_count)
                    .progress(progress.percent_estimate)
                    .metadata_stage(MetadataStage {
                        status: StageStatus::Running,
                        progress: progress.percent_estimate,
                        batch: progress.batch_index,
                        count: progress.cumulative_count,
                    }),
            )
            .await?;
        Ok(())
    }
}
