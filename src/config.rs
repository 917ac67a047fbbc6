//! Configuration types for gallery-export

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Main configuration for the [`Exporter`](crate::Exporter)
///
/// Fields are organized into sub-configs:
/// - [`upstream`](UpstreamConfig) - image source API location and pagination guards
/// - [`export`](ExportConfig) - chunking, TTLs, reuse window, archive streaming
/// - [`persistence`](PersistenceConfig) - staging database location
/// - [`api`](ApiConfig) - REST server binding and CORS
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Upstream image source settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Export pipeline settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Staging database settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check values that would make the pipeline misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.export.chunk_size == 0 {
            return Err(config_error("chunk size must be at least 1", "export.chunk_size"));
        }
        if self.export.flush_every == 0 {
            return Err(config_error(
                "flush interval must be at least 1 chunk",
                "export.flush_every",
            ));
        }
        if self.export.batch_size == 0 {
            return Err(config_error("batch size must be at least 1", "export.batch_size"));
        }
        if !(0..=9).contains(&self.export.compression_level) {
            return Err(config_error(
                format!(
                    "compression level {} is outside 0..=9",
                    self.export.compression_level
                ),
                "export.compression_level",
            ));
        }
        if self.upstream.max_pages == 0 {
            return Err(config_error("page cap must be at least 1", "upstream.max_pages"));
        }
        if self.upstream.assumed_max_batches == 0 {
            return Err(config_error(
                "assumed batch count must be at least 1",
                "upstream.assumed_max_batches",
            ));
        }
        if url::Url::parse(&self.upstream.base_url).is_err() {
            return Err(config_error(
                format!("invalid upstream URL '{}'", self.upstream.base_url),
                "upstream.base_url",
            ));
        }
        if self.export.snapshot_ttl < self.export.reuse_window {
            return Err(config_error(
                "snapshot TTL must outlive the reuse window",
                "export.snapshot_ttl",
            ));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Upstream image source configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UpstreamConfig {
    /// Base URL of the image source API (default: "http://127.0.0.1:8080")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Items requested per page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Hard cap on pages fetched for one export (default: 500)
    ///
    /// Guards against upstream pagination bugs that hand back a cursor forever.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Stop after this many consecutive pages without usable items (default: 3)
    #[serde(default = "default_max_empty_pages")]
    pub max_consecutive_empty_pages: usize,

    /// Batch count assumed when estimating progress (default: 50)
    #[serde(default = "default_assumed_max_batches")]
    pub assumed_max_batches: usize,

    /// Timeout for one page request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Backoff applied to rate-limited and transient page failures
    #[serde(default = "default_rate_limit_retry")]
    pub rate_limit_retry: RetryConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            max_consecutive_empty_pages: default_max_empty_pages(),
            assumed_max_batches: default_assumed_max_batches(),
            request_timeout: default_request_timeout(),
            rate_limit_retry: default_rate_limit_retry(),
        }
    }
}

/// Export pipeline configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExportConfig {
    /// Records per persisted chunk (default: 100)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks per atomic commit while staging (default: 10)
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Minimum accepted credential length (default: 16)
    #[serde(default = "default_min_credential_length")]
    pub min_credential_length: usize,

    /// Age under which a finished export is handed back instead of recomputed (default: 2 hours)
    #[serde(default = "default_reuse_window", with = "duration_serde")]
    pub reuse_window: Duration,

    /// Lifetime of status snapshots (default: 24 hours)
    #[serde(default = "default_snapshot_ttl", with = "duration_serde")]
    pub snapshot_ttl: Duration,

    /// Lifetime of image chunks (default: 24 hours)
    #[serde(default = "default_chunk_ttl", with = "duration_serde")]
    pub chunk_ttl: Duration,

    /// Lifetime of metadata chunks (default: 6 hours)
    #[serde(default = "default_metadata_chunk_ttl", with = "duration_serde")]
    pub metadata_chunk_ttl: Duration,

    /// Path prefix used to build download URLs (default: "/api/v1/export")
    #[serde(default = "default_download_base_path")]
    pub download_base_path: String,

    /// Pause between lock acquisition and the first upstream fetch (default: 500 ms)
    #[serde(default = "default_grace_delay", with = "millis_serde")]
    pub grace_delay: Duration,

    /// Images fetched concurrently per batch (default: 3)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (default: 50 ms)
    #[serde(default = "default_inter_batch_delay", with = "millis_serde")]
    pub inter_batch_delay: Duration,

    /// Timeout for one primary asset fetch (default: 30 seconds)
    #[serde(default = "default_asset_timeout", with = "duration_serde")]
    pub asset_timeout: Duration,

    /// Timeout for one thumbnail fetch (default: 10 seconds)
    #[serde(default = "default_thumbnail_timeout", with = "duration_serde")]
    pub thumbnail_timeout: Duration,

    /// Retry policy for asset fetches
    #[serde(default = "default_asset_retry")]
    pub asset_retry: RetryConfig,

    /// Deflate level for archive entries (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Buffered archive segments before the streamer waits on the client (default: 16)
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            flush_every: default_flush_every(),
            min_credential_length: default_min_credential_length(),
            reuse_window: default_reuse_window(),
            snapshot_ttl: default_snapshot_ttl(),
            chunk_ttl: default_chunk_ttl(),
            metadata_chunk_ttl: default_metadata_chunk_ttl(),
            download_base_path: default_download_base_path(),
            grace_delay: default_grace_delay(),
            batch_size: default_batch_size(),
            inter_batch_delay: default_inter_batch_delay(),
            asset_timeout: default_asset_timeout(),
            thumbnail_timeout: default_thumbnail_timeout(),
            asset_retry: default_asset_retry(),
            compression_level: default_compression_level(),
            output_buffer: default_output_buffer(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 500 ms)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Staging database configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./gallery-export.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Interval of the expired-entry sweep; 0 disables it (default: 10 minutes)
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_max_pages() -> usize {
    500
}

fn default_max_empty_pages() -> usize {
    3
}

fn default_assumed_max_batches() -> usize {
    50
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_rate_limit_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 8,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

fn default_chunk_size() -> usize {
    100
}

fn default_flush_every() -> usize {
    10
}

fn default_min_credential_length() -> usize {
    16
}

fn default_reuse_window() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_snapshot_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_chunk_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_metadata_chunk_ttl() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_download_base_path() -> String {
    "/api/v1/export".to_string()
}

fn default_grace_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_batch_size() -> usize {
    3
}

fn default_inter_batch_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_asset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_thumbnail_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_asset_retry() -> RetryConfig {
    RetryConfig::default()
}

fn default_compression_level() -> i32 {
    6
}

fn default_output_buffer() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./gallery-export.db")
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.export.chunk_size, 100);
        assert_eq!(config.export.batch_size, 3);
        assert_eq!(config.export.reuse_window, Duration::from_secs(7200));
        assert_eq!(config.export.grace_delay, Duration::from_millis(500));
        assert_eq!(config.upstream.max_consecutive_empty_pages, 3);
    }

    #[test]
    fn durations_round_trip_in_their_units() {
        let json = r#"{"export": {"reuse_window": 60, "inter_batch_delay": 5}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.export.reuse_window, Duration::from_secs(60));
        assert_eq!(config.export.inter_batch_delay, Duration::from_millis(5));

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["export"]["reuse_window"], 60);
        assert_eq!(value["export"]["inter_batch_delay"], 5);
    }

    #[test]
    fn zero_chunk_size_is_rejected_with_key() {
        let mut config = Config::default();
        config.export.chunk_size = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("export.chunk_size")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_compression_level_is_rejected_with_key() {
        for level in [-1, 10] {
            let mut config = Config::default();
            config.export.compression_level = level;
            match config.validate() {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("export.compression_level"))
                }
                other => panic!("expected config error for {level}, got {other:?}"),
            }
        }

        let mut config = Config::default();
        config.export.compression_level = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_upstream_url_is_rejected() {
        let mut config = Config::default();
        config.upstream.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn snapshot_ttl_shorter_than_reuse_window_is_rejected() {
        let mut config = Config::default();
        config.export.snapshot_ttl = Duration::from_secs(60);
        assert!(config.validate().is_err());
    }
}
