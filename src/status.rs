//! Durable task status with live event mirroring
//!
//! A [`StatusPublisher`] owns the snapshot of one task for the lifetime of a job.
//! Every update is persisted first and then mirrored to the originating
//! connection's event channel, if one is bound. Losing the ability to persist is
//! fatal: the publisher emits a terminal error event and unbinds the channel so
//! the client's stream ends.

use crate::Result;
use crate::store::{self, KvStore, keys};
use crate::types::{ExportEvent, SnapshotUpdate, StatusSnapshot, TaskId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Read a task snapshot from the store
pub async fn load_snapshot(
    store: &dyn KvStore,
    task_id: &TaskId,
) -> Result<Option<StatusSnapshot>> {
    store::get_json(store, &keys::snapshot(task_id)).await
}

/// Writes the snapshot of a single task and mirrors it to a client
pub struct StatusPublisher {
    store: Arc<dyn KvStore>,
    ttl: Duration,
    events: Option<mpsc::Sender<ExportEvent>>,
    current: Option<StatusSnapshot>,
}

impl StatusPublisher {
    /// Publisher with no bound client
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            events: None,
            current: None,
        }
    }

    /// Publisher mirroring every update to `events`
    pub fn with_events(
        store: Arc<dyn KvStore>,
        ttl: Duration,
        events: mpsc::Sender<ExportEvent>,
    ) -> Self {
        Self {
            events: Some(events),
            ..Self::new(store, ttl)
        }
    }

    /// Whether a client channel is still bound
    pub fn is_bound(&self) -> bool {
        self.events.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Persist the initial snapshot of a task
    pub async fn create(&mut self, snapshot: StatusSnapshot) -> Result<StatusSnapshot> {
        self.persist(&snapshot).await?;
        self.current = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Latest snapshot, from the in-process copy when this publisher wrote it
    pub async fn get(&self, task_id: &TaskId) -> Result<Option<StatusSnapshot>> {
        if let Some(current) = &self.current
            && &current.task.id == task_id
        {
            return Ok(Some(current.clone()));
        }
        load_snapshot(self.store.as_ref(), task_id).await
    }

    /// Merge `update` into the task's snapshot, persist it and mirror it
    ///
    /// Returns `Error::NotFound` when the task has no snapshot.
    pub async fn update(
        &mut self,
        task_id: &TaskId,
        update: SnapshotUpdate,
    ) -> Result<StatusSnapshot> {
        let mut snapshot = match self.current.take() {
            Some(current) if &current.task.id == task_id => current,
            _ => load_snapshot(self.store.as_ref(), task_id)
                .await?
                .ok_or_else(|| crate::Error::NotFound(task_id.to_string()))?,
        };

        let progress_changed = snapshot.apply(&update);
        self.persist(&snapshot).await?;
        self.current = Some(snapshot.clone());

        tracing::debug!(
            task_id = %task_id,
            status = %snapshot.status(),
            progress = snapshot.progress,
            "Export status updated"
        );

        self.emit(ExportEvent::status(&snapshot)).await;
        if progress_changed {
            self.emit(ExportEvent::progress(&snapshot)).await;
        }

        Ok(snapshot)
    }

    /// Send an event to the bound client
    ///
    /// A closed channel unbinds the client; the job keeps running.
    pub async fn emit(&mut self, event: ExportEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        if tx.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped, continuing without client");
            self.events = None;
        }
    }

    /// Emit a terminal event and close the client stream
    pub async fn finish(&mut self, event: ExportEvent) {
        self.emit(event).await;
        self.events = None;
    }

    async fn persist(&mut self, snapshot: &StatusSnapshot) -> Result<()> {
        let key = keys::snapshot(&snapshot.task.id);
        if let Err(e) = store::put_json(self.store.as_ref(), &key, snapshot, self.ttl).await {
            tracing::error!(task_id = %snapshot.task.id, error = %e, "Failed to persist export status");
            self.finish(ExportEvent::error(format!("Failed to persist export status: {}", e)))
                .await;
            return Err(e);
        }
        Ok(())
    }
}
