//! Core types and events for gallery-export

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for an export task
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Allocate a fresh random id (`exp_` followed by 24 hex chars)
    pub fn generate() -> Self {
        let bytes: [u8; 12] = rand::thread_rng().r#gen();
        let mut id = String::with_capacity(4 + 24);
        id.push_str("exp_");
        for b in bytes {
            id.push_str(&format!("{:02x}", b));
        }
        Self(id)
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scope used when the request names none
pub const DEFAULT_SCOPE: &str = "default";

/// Normalize an optional scope selector (absent or blank becomes `"default"`)
pub fn normalize_scope(scope: Option<&str>) -> String {
    match scope.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => DEFAULT_SCOPE.to_string(),
    }
}

/// What goes into the archive besides the primary images
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportOptions {
    /// Write a root `metadata.json` with full per-image records
    #[serde(default)]
    pub include_metadata: bool,
    /// Add `thumbnails/` entries where a distinct thumbnail exists
    #[serde(default)]
    pub include_thumbnails: bool,
}

/// Export task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Allocated, nothing fetched yet
    Preparing,
    /// Discovering and staging the image list
    Running,
    /// Staged; the archive can be downloaded
    Ready,
    /// Terminal failure
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions happen
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Failed)
    }

    /// Lowercase name used in events and errors
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Preparing => "preparing",
            TaskStatus::Running => "running",
            TaskStatus::Ready => "ready",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the metadata discovery stage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not started
    #[default]
    Pending,
    /// Paging through the upstream API
    Running,
    /// All pages fetched
    Completed,
    /// Discovery failed
    Failed,
}

/// Nested sub-status of the metadata discovery stage
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetadataStage {
    /// Stage status
    pub status: StageStatus,
    /// Estimated progress (0-100)
    pub progress: u8,
    /// Pages fetched so far
    pub batch: usize,
    /// Records discovered so far
    pub count: usize,
}

/// Durable export task record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExportTask {
    /// Task id
    pub id: TaskId,
    /// Truncated credential hash, used only for dedup
    pub requester: String,
    /// Normalized scope
    pub scope: String,
    /// Requested archive contents
    pub options: ExportOptions,
    /// Current status
    pub status: TaskStatus,
    /// Images discovered
    pub total_images: usize,
    /// Chunks staged
    pub chunk_count: usize,
    /// Archive filename offered to the client
    pub filename: String,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// Archive byte count recorded by the last complete download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_size_bytes: Option<u64>,
}

/// Durable projection of an [`ExportTask`] plus progress details
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusSnapshot {
    /// The task record
    #[serde(flatten)]
    pub task: ExportTask,
    /// Human-readable description of the current step
    #[serde(default)]
    pub message: String,
    /// Failure message when status is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Metadata discovery sub-status
    #[serde(default)]
    pub metadata_stage: MetadataStage,
    /// Overall progress (0-100)
    #[serde(default)]
    pub progress: u8,
    /// Titles whose thumbnails could not be fetched (best effort)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_thumbnail_titles: Vec<String>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Initial snapshot for a newly allocated task
    pub fn preparing(task: ExportTask) -> Self {
        let updated_at = task.created_at;
        Self {
            task,
            message: "Preparing export".to_string(),
            error: None,
            metadata_stage: MetadataStage::default(),
            progress: 0,
            missing_thumbnail_titles: Vec::new(),
            updated_at,
        }
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        self.task.status
    }

    /// Apply a partial update, returning whether progress fields changed
    pub fn apply(&mut self, update: &SnapshotUpdate) -> bool {
        if let Some(status) = update.status {
            self.task.status = status;
        }
        if let Some(message) = &update.message {
            self.message = message.clone();
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        if let Some(stage) = &update.metadata_stage {
            self.metadata_stage = stage.clone();
        }
        if let Some(total) = update.total_images {
            self.task.total_images = total;
        }
        if let Some(chunks) = update.chunk_count {
            self.task.chunk_count = chunks;
        }
        if let Some(size) = update.final_size_bytes {
            self.task.final_size_bytes = Some(size);
        }
        if let Some(titles) = &update.missing_thumbnail_titles {
            self.missing_thumbnail_titles = titles.clone();
        }
        let progress_changed = update.progress.is_some() || update.total_images.is_some();
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        self.updated_at = Utc::now();
        progress_changed
    }
}

/// Partial changes merged into a [`StatusSnapshot`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotUpdate {
    /// New status
    pub status: Option<TaskStatus>,
    /// New message
    pub message: Option<String>,
    /// Failure message
    pub error: Option<String>,
    /// New metadata stage
    pub metadata_stage: Option<MetadataStage>,
    /// Overall progress (0-100)
    pub progress: Option<u8>,
    /// Images discovered
    pub total_images: Option<usize>,
    /// Chunks staged
    pub chunk_count: Option<usize>,
    /// Archive size from a complete run
    pub final_size_bytes: Option<u64>,
    /// Titles without thumbnails
    pub missing_thumbnail_titles: Option<Vec<String>>,
}

impl SnapshotUpdate {
    /// Set the status
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the failure message
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set the metadata stage
    pub fn metadata_stage(mut self, stage: MetadataStage) -> Self {
        self.metadata_stage = Some(stage);
        self
    }

    /// Set overall progress
    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the discovered image count
    pub fn total_images(mut self, total: usize) -> Self {
        self.total_images = Some(total);
        self
    }

    /// Set the staged chunk count
    pub fn chunk_count(mut self, count: usize) -> Self {
        self.chunk_count = Some(count);
        self
    }

    /// Record the archive size of a complete run
    pub fn final_size_bytes(mut self, size: u64) -> Self {
        self.final_size_bytes = Some(size);
        self
    }

    /// Record titles whose thumbnails were unavailable
    pub fn missing_thumbnail_titles(mut self, titles: Vec<String>) -> Self {
        self.missing_thumbnail_titles = Some(titles);
        self
    }
}

/// One image discovered upstream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ImageRecord {
    /// Upstream id
    pub id: String,
    /// Primary asset URL
    pub url: String,
    /// Thumbnail URL, if the source offers one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Title or prompt
    #[serde(default)]
    pub title: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Pixel width
    #[serde(default)]
    pub width: u32,
    /// Pixel height
    #[serde(default)]
    pub height: u32,
    /// Raw upstream entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub raw: Option<serde_json::Value>,
}

impl ImageRecord {
    /// Copy without the raw blob, as stored in streaming chunks
    pub fn lean(&self) -> Self {
        Self {
            raw: None,
            ..self.clone()
        }
    }
}

/// Body of a create-export request
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExportRequest {
    /// Upstream API credential
    pub credential: String,
    /// Workspace/account selector
    #[serde(default)]
    pub scope: Option<String>,
    /// Write `metadata.json`
    #[serde(default)]
    pub include_metadata: bool,
    /// Add thumbnails
    #[serde(default)]
    pub include_thumbnails: bool,
}

impl ExportRequest {
    /// Requested archive contents
    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            include_metadata: self.include_metadata,
            include_thumbnails: self.include_thumbnails,
        }
    }
}

/// Descriptor returned when a recent finished export is reused
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExistingTaskDescriptor {
    /// Task id
    pub task_id: TaskId,
    /// Archive filename
    pub filename: String,
    /// Where to download the archive
    pub download_url: String,
    /// Images in the archive
    pub total_images: usize,
    /// Seconds since the task was created
    pub age_seconds: u64,
    /// Always true; lets clients tell this apart from an event stream
    pub reused: bool,
}

/// Event pushed to the client that requested an export
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportEvent {
    /// Phase transition
    Status {
        /// Task status
        phase: TaskStatus,
        /// Human-readable message
        message: String,
        /// Metadata stage details
        #[serde(skip_serializing_if = "Option::is_none")]
        stage_detail: Option<MetadataStage>,
    },
    /// Progress update
    Progress {
        /// Images discovered so far
        total_images: usize,
        /// Estimated progress (0-100)
        percent: u8,
    },
    /// Archive ready for download
    DownloadReady {
        /// Task id
        task_id: TaskId,
        /// Archive filename
        filename: String,
        /// Where to download the archive
        download_url: String,
        /// Images in the archive
        total_images: usize,
        /// Titles whose thumbnails are known to be missing
        #[serde(skip_serializing_if = "Option::is_none")]
        missing_thumbnail_titles: Option<Vec<String>>,
    },
    /// Terminal failure
    Error {
        /// What went wrong
        message: String,
    },
}

impl ExportEvent {
    /// Status event mirroring a snapshot
    pub fn status(snapshot: &StatusSnapshot) -> Self {
        ExportEvent::Status {
            phase: snapshot.status(),
            message: snapshot.message.clone(),
            stage_detail: Some(snapshot.metadata_stage.clone()),
        }
    }

    /// Progress event mirroring a snapshot
    pub fn progress(snapshot: &StatusSnapshot) -> Self {
        ExportEvent::Progress {
            total_images: snapshot.task.total_images,
            percent: snapshot.progress,
        }
    }

    /// Download-ready event for a staged task
    pub fn download_ready(snapshot: &StatusSnapshot, download_url: String) -> Self {
        let missing = &snapshot.missing_thumbnail_titles;
        ExportEvent::DownloadReady {
            task_id: snapshot.task.id.clone(),
            filename: snapshot.task.filename.clone(),
            download_url,
            total_images: snapshot.task.total_images,
            missing_thumbnail_titles: (!missing.is_empty()).then(|| missing.clone()),
        }
    }

    /// Terminal error event
    pub fn error(message: impl Into<String>) -> Self {
        ExportEvent::Error {
            message: message.into(),
        }
    }

    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            ExportEvent::Status { .. } => "status",
            ExportEvent::Progress { .. } => "progress",
            ExportEvent::DownloadReady { .. } => "download_ready",
            ExportEvent::Error { .. } => "error",
        }
    }

    /// Whether the stream ends after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportEvent::DownloadReady { .. } | ExportEvent::Error { .. }
        )
    }
}
