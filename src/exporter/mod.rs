//! Exporter facade
//!
//! The `Exporter` owns the staging database and every pipeline component:
//! - [`ExportCoordinator`] - request entry point and background listing jobs
//! - [`ArchiveStreamer`] - archive downloads for ready tasks
//! - [`lifecycle`] - expired-entry sweep and shutdown

mod lifecycle;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::archive::{
    ArchiveDownload, ArchiveStreamer, AssetFetcher, DownloadHead, DownloadRegistry,
    HttpAssetFetcher,
};
use crate::chunks::ChunkStore;
use crate::config::Config;
use crate::coordinator::{ExportCoordinator, ExportResponse};
use crate::db::Database;
use crate::error::Result;
use crate::fetcher::{HttpImageSource, ImageSource, MetadataFetcher};
use crate::status::load_snapshot;
use crate::store::KvStore;
use crate::types::{ExportRequest, StatusSnapshot, TaskId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main exporter instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Exporter {
    /// Staging database
    /// Public for integration tests to inspect staged state
    pub db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) coordinator: ExportCoordinator,
    pub(crate) streamer: ArchiveStreamer,
    /// Cancelled once shutdown begins
    pub(crate) shutdown: CancellationToken,
}

impl Exporter {
    /// Open the staging database and wire up HTTP-backed sources
    pub async fn new(config: Config) -> Result<Self> {
        let images = Arc::new(HttpImageSource::new(&config.upstream)?);
        let assets = Arc::new(HttpAssetFetcher::new()?);
        Self::with_sources(config, images, assets).await
    }

    /// Open the staging database with custom image and asset sources
    pub async fn with_sources(
        config: Config,
        images: Arc<dyn ImageSource>,
        assets: Arc<dyn AssetFetcher>,
    ) -> Result<Self> {
        config.validate()?;
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let store: Arc<dyn KvStore> = db.clone();

        let shutdown = CancellationToken::new();
        let chunks = ChunkStore::new(store.clone(), &config.export);
        let fetcher = Arc::new(MetadataFetcher::new(images, config.upstream.clone()));
        let coordinator = ExportCoordinator::new(
            store.clone(),
            fetcher,
            chunks.clone(),
            config.export.clone(),
            shutdown.clone(),
        );
        let streamer = ArchiveStreamer::new(
            store,
            chunks,
            assets,
            DownloadRegistry::new(),
            config.export.clone(),
        );

        tracing::info!(
            database = %config.persistence.database_path.display(),
            upstream = %config.upstream.base_url,
            "Exporter initialized"
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            coordinator,
            streamer,
            shutdown,
        })
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Active download registry
    pub fn downloads(&self) -> &DownloadRegistry {
        self.streamer.registry()
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Start an export, or hand back a recent ready one
    pub async fn request_export(&self, request: ExportRequest) -> Result<ExportResponse> {
        self.coordinator.request_export(request).await
    }

    /// Latest status snapshot of a task
    pub async fn snapshot(&self, task_id: &TaskId) -> Result<Option<StatusSnapshot>> {
        load_snapshot(self.db.as_ref(), task_id).await
    }

    /// Headers a download of a ready task would carry
    pub async fn download_head(&self, task_id: &TaskId) -> Result<DownloadHead> {
        self.streamer.head(task_id).await
    }

    /// Start streaming the archive of a ready task
    pub async fn start_download(&self, task_id: &TaskId) -> Result<ArchiveDownload> {
        if self.is_shutting_down() {
            return Err(crate::Error::ShuttingDown);
        }
        self.streamer.start(task_id).await
    }
}
