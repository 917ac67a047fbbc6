//! One active download per task
//!
//! Registering a download for a task cancels whichever download was active for
//! it before; the newest request wins. The registry is in-process only.

use crate::types::TaskId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for the running download of a task
#[derive(Debug, Clone)]
pub struct ActiveDownload {
    /// Identifies the connection that owns the download
    pub connection_id: u64,
    /// When the download was registered
    pub started_at: Instant,
    /// Cancelled when the download is superseded or the server shuts down
    pub token: CancellationToken,
}

/// Map of task id to its active download
#[derive(Clone, Default)]
pub struct DownloadRegistry {
    active: Arc<Mutex<HashMap<TaskId, ActiveDownload>>>,
    next_connection: Arc<AtomicU64>,
}

impl DownloadRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, ActiveDownload>> {
        // The map stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Become the active download of `task_id`, cancelling any previous one
    pub fn register(&self, task_id: &TaskId) -> DownloadLease {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let entry = ActiveDownload {
            connection_id,
            started_at: Instant::now(),
            token: token.clone(),
        };

        if let Some(previous) = self.lock().insert(task_id.clone(), entry) {
            tracing::info!(
                task_id = %task_id,
                superseded = previous.connection_id,
                connection_id,
                running_for_ms = previous.started_at.elapsed().as_millis() as u64,
                "Superseding active download"
            );
            previous.token.cancel();
        }

        DownloadLease {
            registry: self.clone(),
            task_id: task_id.clone(),
            connection_id,
            token,
        }
    }

    /// Current active download of `task_id`
    pub fn get(&self, task_id: &TaskId) -> Option<ActiveDownload> {
        self.lock().get(task_id).cloned()
    }

    /// Number of active downloads
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Cancel every active download, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for download in active.values() {
            download.token.cancel();
        }
        active.len()
    }

    fn release(&self, task_id: &TaskId, connection_id: u64) {
        let mut active = self.lock();
        if active
            .get(task_id)
            .is_some_and(|d| d.connection_id == connection_id)
        {
            active.remove(task_id);
        }
    }
}

/// Held by a running download; deregisters it on drop
pub struct DownloadLease {
    registry: DownloadRegistry,
    task_id: TaskId,
    connection_id: u64,
    token: CancellationToken,
}

impl DownloadLease {
    /// Cancellation signal for this download
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this download has been superseded or shut down
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Connection id assigned at registration
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl Drop for DownloadLease {
    fn drop(&mut self) {
        self.registry.release(&self.task_id, self.connection_id);
    }
}
