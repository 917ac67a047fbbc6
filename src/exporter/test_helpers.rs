//! Shared test helpers for creating Exporter instances in tests.

use crate::archive::{AssetFetcher, FetchedAsset};
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::exporter::Exporter;
use crate::fetcher::{ImageSource, RawPage};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

/// Credential accepted by the default validation rules
pub(crate) const TEST_CREDENTIAL: &str = "sk-test-0123456789abcdef";

/// Image source serving fixed pages; `cursor = Some("n")` returns page n
pub(crate) struct PagedSource {
    pages: Vec<Vec<serde_json::Value>>,
    pub(crate) calls: AtomicUsize,
}

impl PagedSource {
    /// Pages with the given item counts; ids, titles and URLs are numbered from 1
    pub(crate) fn with_images(counts: &[usize]) -> Self {
        let mut next = 0;
        let pages = counts
            .iter()
            .map(|count| {
                (0..*count)
                    .map(|_| {
                        next += 1;
                        json!({
                            "id": format!("img-{}", next),
                            "url": format!("memory://img/{}.png", next),
                            "thumbnail_url": format!("memory://thumb/{}.png", next),
                            "title": format!("Image {}", next),
                            "created_at": 1_700_000_000 + next,
                            "width": 64,
                            "height": 64,
                        })
                    })
                    .collect()
            })
            .collect();
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImageSource for PagedSource {
    async fn fetch_page(
        &self,
        _credential: &str,
        _scope: &str,
        cursor: Option<&str>,
        _limit: usize,
    ) -> Result<RawPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let items = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(RawPage { items, next_cursor })
    }
}

/// Asset fetcher answering every URL from memory
#[derive(Default)]
pub(crate) struct MemoryAssets {
    pub(crate) fetches: AtomicUsize,
}

#[async_trait]
impl AssetFetcher for MemoryAssets {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedAsset> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if url.contains("missing") {
            return Err(Error::AssetFetch {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
                retryable: false,
            });
        }
        Ok(FetchedAsset {
            data: format!("bytes of {}", url).into_bytes(),
            content_type: Some("image/png".to_string()),
        })
    }
}

/// Config pointing at a temp database with fast streaming settings
pub(crate) fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.path().join("test.db");
    config.persistence.cleanup_interval = Duration::ZERO;
    config.export.grace_delay = Duration::from_millis(10);
    config.export.inter_batch_delay = Duration::ZERO;
    config.export.asset_retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Helper to create a test Exporter over in-memory sources.
/// Returns the exporter, its sources and the tempdir (which must be kept alive).
pub(crate) async fn create_test_exporter(
    counts: &[usize],
) -> (
    Exporter,
    Arc<PagedSource>,
    Arc<MemoryAssets>,
    tempfile::TempDir,
) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir);
    let source = Arc::new(PagedSource::with_images(counts));
    let assets = Arc::new(MemoryAssets::default());
    let exporter = Exporter::with_sources(config, source.clone(), assets.clone())
        .await
        .unwrap();
    (exporter, source, assets, temp_dir)
}
