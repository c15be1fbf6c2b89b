use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use super::errors::UpstreamError;
use crate::config::UpstreamConfig;
use crate::models::{AlbumId, RangeWindow, TrackId};
use crate::utils::retry::{self, RetryPolicy};

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Body and curated header subset of one ranged audio fetch.
#[derive(Debug, Clone)]
pub struct RangeFetch {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub content_range: Option<String>,
    pub accept_ranges: Option<String>,
    pub last_modified: Option<String>,
    pub vary: Option<String>,
}

/// Seam between the request handlers and the external catalog API, so the
/// handlers can be exercised against a fake.
#[async_trait]
pub trait CatalogUpstream: Send + Sync {
    /// Fetch one byte window of a track's audio. `params` carries the
    /// allow-listed caller parameters, already filtered by the handler.
    async fn fetch_range(
        &self,
        track: &TrackId,
        window: &RangeWindow,
        params: &[(String, String)],
    ) -> Result<RangeFetch, UpstreamError>;

    /// JSON passthrough for catalog routes.
    async fn catalog(&self, path: &str, params: &[(String, String)])
    -> Result<Value, UpstreamError>;

    /// Stream an album archive into `dest`, returning the byte count.
    async fn fetch_archive(&self, album: &AlbumId, dest: &Path) -> Result<u64, UpstreamError>;
}

/// HTTP client for the Jamendo-style catalog API. Injects the configured
/// `client_id` and a `format=json` default on every call; transient
/// failures are retried up to the configured bound.
pub struct JamendoClient {
    client: reqwest::Client,
    base_url: Url,
    client_id: String,
    retry: RetryPolicy,
}

impl JamendoClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| anyhow::anyhow!("invalid upstream base URL {:?}: {}", config.base_url, e))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url,
            client_id: config.client_id.clone(),
            retry: RetryPolicy::fixed(config.max_retries, RETRY_DELAY),
        })
    }

    fn endpoint(&self, path: &str, params: &[(String, String)]) -> Result<Url, UpstreamError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| UpstreamError::Network(format!("invalid upstream path {:?}: {}", path, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("client_id", &self.client_id);
            pairs.append_pair("format", "json");
            for (name, value) in params {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }
}

#[async_trait]
impl CatalogUpstream for JamendoClient {
    async fn fetch_range(
        &self,
        track: &TrackId,
        window: &RangeWindow,
        params: &[(String, String)],
    ) -> Result<RangeFetch, UpstreamError> {
        let mut query = vec![
            ("id".to_string(), track.to_string()),
            ("action".to_string(), "stream".to_string()),
        ];
        query.extend_from_slice(params);
        let url = self.endpoint("tracks/file", &query)?;

        debug!(
            "fetching track {} range {} from upstream",
            track,
            window.header_value()
        );

        let response = retry::retry_if(
            &self.retry,
            || {
                let url = url.clone();
                async move {
                    let response = self
                        .client
                        .get(url)
                        .header(header::RANGE, window.header_value())
                        .send()
                        .await
                        .map_err(UpstreamError::from_reqwest)?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(UpstreamError::from_status(status.as_u16(), body));
                    }
                    Ok(response)
                }
            },
            UpstreamError::is_transient,
        )
        .await
        .map_err(|e| e.last)?;

        let content_type = Self::header_string(&response, header::CONTENT_TYPE);
        let content_range = Self::header_string(&response, header::CONTENT_RANGE);
        let accept_ranges = Self::header_string(&response, header::ACCEPT_RANGES);
        let last_modified = Self::header_string(&response, header::LAST_MODIFIED);
        let vary = Self::header_string(&response, header::VARY);

        let body = response
            .bytes()
            .await
            .map_err(UpstreamError::from_reqwest)?
            .to_vec();

        Ok(RangeFetch {
            body,
            content_type,
            content_range,
            accept_ranges,
            last_modified,
            vary,
        })
    }

    async fn catalog(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, UpstreamError> {
        let url = self.endpoint(path, params)?;
        let response = retry::retry_if(
            &self.retry,
            || {
                let url = url.clone();
                async move {
                    let response = self
                        .client
                        .get(url)
                        .send()
                        .await
                        .map_err(UpstreamError::from_reqwest)?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        warn!("upstream catalog call {:?} failed with {}", path, status);
                        return Err(UpstreamError::from_status(status.as_u16(), body));
                    }
                    Ok(response)
                }
            },
            UpstreamError::is_transient,
        )
        .await
        .map_err(|e| e.last)?;

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn fetch_archive(&self, album: &AlbumId, dest: &Path) -> Result<u64, UpstreamError> {
        let query = vec![("id".to_string(), album.to_string())];
        let url = self.endpoint("albums/file", &query)?;

        // Each attempt recreates the staging file, so a retried download
        // starts from a truncated file rather than appending.
        let total = retry::retry_if(
            &self.retry,
            || {
                let url = url.clone();
                async move {
                    let response = self
                        .client
                        .get(url)
                        .send()
                        .await
                        .map_err(UpstreamError::from_reqwest)?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(UpstreamError::from_status(status.as_u16(), body));
                    }

                    let mut file = tokio::fs::File::create(dest)
                        .await
                        .map_err(|e| UpstreamError::Io(format!("create {:?}: {}", dest, e)))?;

                    let mut total: u64 = 0;
                    let mut stream = response.bytes_stream();
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk.map_err(UpstreamError::from_reqwest)?;
                        file.write_all(&chunk)
                            .await
                            .map_err(|e| UpstreamError::Io(format!("write {:?}: {}", dest, e)))?;
                        total += chunk.len() as u64;
                    }
                    file.flush()
                        .await
                        .map_err(|e| UpstreamError::Io(format!("flush {:?}: {}", dest, e)))?;
                    Ok(total)
                }
            },
            UpstreamError::is_transient,
        )
        .await
        .map_err(|e| e.last)?;

        debug!("spooled {} archive bytes for album {}", total, album);
        Ok(total)
    }
}
