//! Metadata discovery against the upstream image source
//!
//! [`MetadataFetcher`] pages through an [`ImageSource`] one cursor at a time and
//! normalizes the raw entries into [`ImageRecord`]s, reporting progress after
//! every page. Rate limits and transient upstream failures are retried on the
//! same cursor with exponential backoff.

use crate::config::UpstreamConfig;
use crate::retry::retry_with_backoff;
use crate::types::ImageRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// One page of raw upstream entries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    /// Raw entries, normalized by [`normalize`]
    #[serde(default)]
    pub items: Vec<Value>,
    /// Opaque cursor for the next page; absent or empty on the last page
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Paginated upstream image listing
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch the page starting at `cursor` (first page when `None`)
    async fn fetch_page(
        &self,
        credential: &str,
        scope: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RawPage>;
}

/// [`ImageSource`] over the HTTP listing endpoint
///
/// `GET {base_url}/images?scope=…&limit=…[&cursor=…]` with a bearer credential.
pub struct HttpImageSource {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpImageSource {
    /// Build a client for the configured upstream
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let endpoint = url::Url::parse(&format!(
            "{}/images",
            config.base_url.trim_end_matches('/')
        ))
        .map_err(|e| Error::Config {
            message: format!("invalid upstream base_url: {}", e),
            key: Some("upstream.base_url".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("gallery-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }
}

/// Map a non-success listing response to an error
fn classify_status(status: StatusCode) -> Error {
    let code = status.as_u16();
    match code {
        401 => Error::UpstreamAuth { status: code },
        403 | 429 => Error::UpstreamRateLimit { status: code },
        500..=599 => Error::UpstreamUnavailable { status: code },
        _ => Error::Fetch(format!("upstream returned HTTP {}", code)),
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch_page(
        &self,
        credential: &str,
        scope: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RawPage> {
        let limit = limit.to_string();
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(credential)
            .query(&[("scope", scope), ("limit", limit.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        response
            .json::<RawPage>()
            .await
            .map_err(|e| Error::Fetch(format!("malformed listing page: {}", e)))
    }
}

/// Progress after one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    /// Pages fetched so far (1-based)
    pub batch_index: usize,
    /// Records discovered so far
    pub cumulative_count: usize,
    /// Estimated completion, capped at 95 until the listing ends
    pub percent_estimate: u8,
}

impl FetchProgress {
    fn new(batch_index: usize, cumulative_count: usize, assumed_max_batches: usize) -> Self {
        let estimate = batch_index.saturating_mul(100) / assumed_max_batches.max(1);
        Self {
            batch_index,
            cumulative_count,
            percent_estimate: estimate.min(95) as u8,
        }
    }
}

/// Receives progress while the listing is paged
#[async_trait]
pub trait FetchObserver: Send {
    /// Called after every page; an error aborts discovery
    async fn on_page(&mut self, progress: FetchProgress) -> Result<()>;
}

#[async_trait]
impl FetchObserver for Vec<FetchProgress> {
    async fn on_page(&mut self, progress: FetchProgress) -> Result<()> {
        self.push(progress);
        Ok(())
    }
}

/// Pages the upstream listing into an ordered record list
pub struct MetadataFetcher {
    source: Arc<dyn ImageSource>,
    config: UpstreamConfig,
}

impl MetadataFetcher {
    /// Fetcher over `source`
    pub fn new(source: Arc<dyn ImageSource>, config: UpstreamConfig) -> Self {
        Self { source, config }
    }

    /// Discover every image in `scope`
    ///
    /// Stops at the end of the cursor chain, after
    /// `max_consecutive_empty_pages` pages without usable entries, or at the
    /// `max_pages` cap. Fails with `"No images found"` if nothing was discovered.
    pub async fn fetch_all<O>(
        &self,
        credential: &str,
        scope: &str,
        observer: &mut O,
    ) -> Result<Vec<ImageRecord>>
    where
        O: FetchObserver + ?Sized,
    {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut empty_streak = 0;
        let mut discarded = 0usize;

        for batch_index in 1..=self.config.max_pages {
            let page = retry_with_backoff(&self.config.rate_limit_retry, || {
                self.source
                    .fetch_page(credential, scope, cursor.as_deref(), self.config.page_size)
            })
            .await?;

            let raw_count = page.items.len();
            let before = records.len();
            records.extend(page.items.into_iter().filter_map(normalize));
            let added = records.len() - before;
            discarded += raw_count - added;

            tracing::debug!(
                batch = batch_index,
                added,
                total = records.len(),
                "Fetched listing page"
            );

            observer
                .on_page(FetchProgress::new(
                    batch_index,
                    records.len(),
                    self.config.assumed_max_batches,
                ))
                .await?;

            if added == 0 {
                empty_streak += 1;
                if empty_streak >= self.config.max_consecutive_empty_pages {
                    tracing::info!(
                        batch = batch_index,
                        "Stopping after {} consecutive empty pages",
                        empty_streak
                    );
                    break;
                }
            } else {
                empty_streak = 0;
            }

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }

            if batch_index == self.config.max_pages {
                tracing::warn!(
                    max_pages = self.config.max_pages,
                    total = records.len(),
                    "Listing page cap reached, export will be truncated"
                );
            }
        }

        if discarded > 0 {
            tracing::warn!(discarded, "Discarded malformed listing entries");
        }

        if records.is_empty() {
            return Err(Error::Fetch("No images found".to_string()));
        }

        Ok(records)
    }
}

/// Convert a raw upstream entry into an [`ImageRecord`]
///
/// Entries without an id, an asset URL or a parsable timestamp are dropped.
pub fn normalize(raw: Value) -> Option<ImageRecord> {
    let id = match raw.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let url = string_field(&raw, &["url", "image_url"])?;
    let created_at = parse_timestamp(raw.get("created_at")?)?;
    let thumbnail_url = string_field(&raw, &["thumbnail_url", "thumbnail"]);
    let title = string_field(&raw, &["title", "prompt"]).unwrap_or_default();
    let dimension = |key: &str| {
        raw.get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };

    Some(ImageRecord {
        id,
        url,
        thumbnail_url,
        title,
        created_at,
        width: dimension("width"),
        height: dimension("height"),
        raw: Some(raw.clone()),
    })
}

/// First non-empty string among `keys`
fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// RFC 3339 string or unix seconds
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.parse::<i64>().ok().and_then(from_unix)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_unix),
        _ => None,
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CREDENTIAL: &str = "sk-test-credential-0001";

    fn upstream_config(base_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base_url.to_string(),
            page_size: 2,
            rate_limit_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..UpstreamConfig::default()
        }
    }

    fn item(id: u32) -> Value {
        json!({
            "id": format!("img-{}", id),
            "url": format!("https://cdn.example.com/{}.png", id),
            "title": format!("Image {}", id),
            "created_at": "2024-03-01T12:00:00Z",
            "width": 512,
            "height": 512,
        })
    }

    fn fetcher_for(server: &MockServer) -> MetadataFetcher {
        let config = upstream_config(&server.uri());
        let source = HttpImageSource::new(&config).unwrap();
        MetadataFetcher::new(Arc::new(source), config)
    }

    #[test]
    fn normalize_accepts_alternate_field_names() {
        let record = normalize(json!({
            "id": 42,
            "image_url": "https://cdn.example.com/42.webp",
            "prompt": "a red fox",
            "created_at": 1_700_000_000,
        }))
        .unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.url, "https://cdn.example.com/42.webp");
        assert_eq!(record.title, "a red fox");
        assert_eq!(record.created_at.timestamp(), 1_700_000_000);
        assert!(record.raw.is_some());
    }

    #[test]
    fn normalize_drops_incomplete_entries() {
        assert!(normalize(json!({"url": "u", "created_at": 1})).is_none());
        assert!(normalize(json!({"id": "a", "created_at": 1})).is_none());
        assert!(normalize(json!({"id": "a", "url": "u"})).is_none());
        assert!(normalize(json!({"id": "a", "url": "u", "created_at": "yesterday"})).is_none());
        assert!(normalize(json!("not an object")).is_none());
    }

    #[test]
    fn progress_estimate_is_capped() {
        assert_eq!(FetchProgress::new(1, 10, 50).percent_estimate, 2);
        assert_eq!(FetchProgress::new(49, 10, 50).percent_estimate, 95);
        assert_eq!(FetchProgress::new(500, 10, 50).percent_estimate, 95);
        assert_eq!(FetchProgress::new(3, 10, 0).percent_estimate, 95);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Error::UpstreamAuth { status: 401 }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            Error::UpstreamRateLimit { status: 403 }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            Error::UpstreamUnavailable { status: 502 }
        ));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND), Error::Fetch(_)));
    }

    #[tokio::test]
    async fn follows_cursor_chain_in_order() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .and(query_param("cursor", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item(3)],
                "next_cursor": null,
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .and(query_param("scope", "default"))
            .and(header("authorization", format!("Bearer {}", CREDENTIAL).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item(1), item(2)],
                "next_cursor": "page-2",
            })))
            .mount(&server)
            .await;

        let mut progress = Vec::new();
        let records = fetcher_for(&server)
            .fetch_all(CREDENTIAL, "default", &mut progress)
            .await
            .unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["img-1", "img-2", "img-3"]);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[1].batch_index, 2);
        assert_eq!(progress[1].cumulative_count, 3);
    }

    #[tokio::test]
    async fn stops_after_consecutive_empty_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .and(query_param("cursor", "more"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [],
                "next_cursor": "more",
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item(1)],
                "next_cursor": "more",
            })))
            .mount(&server)
            .await;

        let mut progress = Vec::new();
        let records = fetcher_for(&server)
            .fetch_all(CREDENTIAL, "default", &mut progress)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        // One page with data, then three empty ones
        assert_eq!(progress.len(), 4);
    }

    #[tokio::test]
    async fn page_cap_bounds_an_endless_listing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item(1)],
                "next_cursor": "again",
            })))
            .mount(&server)
            .await;

        let mut config = upstream_config(&server.uri());
        config.max_pages = 5;
        let source = HttpImageSource::new(&config).unwrap();
        let fetcher = MetadataFetcher::new(Arc::new(source), config);

        let mut progress = Vec::new();
        let records = fetcher
            .fetch_all(CREDENTIAL, "default", &mut progress)
            .await
            .unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn rate_limit_is_retried_on_same_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [item(1)],
            })))
            .mount(&server)
            .await;

        let mut progress = Vec::new();
        let records = fetcher_for(&server)
            .fetch_all(CREDENTIAL, "default", &mut progress)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejected_credential_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut progress = Vec::new();
        let result = fetcher_for(&server)
            .fetch_all(CREDENTIAL, "default", &mut progress)
            .await;
        assert!(matches!(result, Err(Error::UpstreamAuth { status: 401 })));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert!(progress.is_empty());
    }

    #[tokio::test]
    async fn empty_listing_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [],
                "next_cursor": null,
            })))
            .mount(&server)
            .await;

        let mut progress = Vec::new();
        let result = fetcher_for(&server)
            .fetch_all(CREDENTIAL, "default", &mut progress)
            .await;
        match result {
            Err(Error::Fetch(message)) => assert_eq!(message, "No images found"),
            other => panic!("expected fetch error, got {:?}", other),
        }
    }
}
