//! Expired-entry sweep and shutdown coordination.

use crate::error::Result;
use crate::store::KvStore;
use std::time::Duration;

use super::Exporter;

impl Exporter {
    /// Delete every staged entry whose TTL has elapsed
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup(&self) -> Result<u64> {
        let removed = self.db.sweep_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "Swept expired export state");
        } else {
            tracing::debug!("No expired export state to sweep");
        }
        Ok(removed)
    }

    /// Start the periodic sweep configured by `persistence.cleanup_interval`
    ///
    /// The task stops when shutdown begins.
    pub fn start_cleanup_service(&self) -> tokio::task::JoinHandle<()> {
        let interval = self.config.persistence.cleanup_interval;
        if interval.is_zero() {
            tracing::info!("Cleanup interval is zero, skipping cleanup service");
            return tokio::spawn(async {});
        }

        let exporter = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = exporter.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = exporter.cleanup().await {
                            tracing::warn!(error = %e, "Periodic cleanup failed");
                        }
                    }
                }
            }
            tracing::debug!("Cleanup service stopped");
        });

        tracing::info!(interval_secs = interval.as_secs(), "Cleanup service started");
        handle
    }

    /// Gracefully shut down the exporter
    ///
    /// 1. Stops accepting new exports and downloads
    /// 2. Cancels every active download
    /// 3. Waits briefly for the downloads to release their leases
    ///
    /// Listing jobs already running finish on their own; their state is
    /// durable and expires with its TTL.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.shutdown.cancel();

        let cancelled = self.downloads().cancel_all();
        tracing::info!(cancelled, "Signaled cancellation to active downloads");

        let wait = tokio::time::timeout(Duration::from_secs(10), self.wait_for_downloads()).await;
        if wait.is_err() {
            tracing::warn!(
                remaining = self.downloads().active_count(),
                "Timeout waiting for downloads to stop, proceeding with shutdown"
            );
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Resolves once shutdown has begun
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.cancelled().await
    }

    async fn wait_for_downloads(&self) {
        while self.downloads().active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
