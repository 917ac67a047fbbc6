//! Asset fetching for archive entries

use crate::config::RetryConfig;
use crate::retry::retry_with_backoff;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Bytes of one fetched asset
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAsset {
    /// Response body
    pub data: Vec<u8>,
    /// Content-Type header, if any
    pub content_type: Option<String>,
}

/// Fetches image and thumbnail bytes
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedAsset>;
}

/// [`AssetFetcher`] over plain HTTP GETs
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    /// Build the HTTP client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gallery-export/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn asset_error(url: &str, reason: impl Into<String>, retryable: bool) -> Error {
    Error::AssetFetch {
        url: url.to_string(),
        reason: reason.into(),
        retryable,
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedAsset> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect() || e.is_request();
                asset_error(url, e.to_string(), retryable)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.is_server_error()
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::REQUEST_TIMEOUT;
            return Err(asset_error(url, format!("HTTP {}", status.as_u16()), retryable));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data = response
            .bytes()
            .await
            .map_err(|e| asset_error(url, format!("body read failed: {}", e), true))?;

        Ok(FetchedAsset {
            data: data.to_vec(),
            content_type,
        })
    }
}

/// Fetch with bounded exponential-backoff retry
pub async fn fetch_with_retry(
    fetcher: &dyn AssetFetcher,
    url: &str,
    timeout: Duration,
    retry: &RetryConfig,
) -> Result<FetchedAsset> {
    retry_with_backoff(retry, || fetcher.fetch(url, timeout)).await
}
