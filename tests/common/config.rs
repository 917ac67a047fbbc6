//! Test configuration helpers for creating exporters against a mock upstream

use gallery_export::config::RetryConfig;
use gallery_export::{Config, Exporter};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Config pointing at `server` with a temp database and fast timings
pub fn test_config(server: &MockServer, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = server.uri();
    config.upstream.page_size = 10;
    config.upstream.rate_limit_retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.persistence.database_path = temp_dir.path().join("e2e.db");
    config.persistence.cleanup_interval = Duration::ZERO;
    config.export.chunk_size = 4;
    config.export.flush_every = 2;
    config.export.grace_delay = Duration::from_millis(10);
    config.export.inter_batch_delay = Duration::from_millis(1);
    config.export.asset_retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Create an Exporter against `server`
///
/// Returns the exporter and temp directory (keep temp_dir alive for test duration)
pub async fn create_exporter(server: &MockServer) -> (Exporter, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap_or_else(|e| panic!("temp dir: {}", e));
    let config = test_config(server, &temp_dir);
    let exporter = Exporter::new(config)
        .await
        .unwrap_or_else(|e| panic!("exporter: {}", e));
    (exporter, temp_dir)
}
