//! Shared fakes and builders for unit tests.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::cache::{ArchiveCache, CacheStore};
use crate::config::Config;
use crate::models::{AlbumId, RangeWindow, TrackId};
use crate::server::AppState;
use crate::upstream::{CatalogUpstream, RangeFetch, UpstreamError};

/// In-memory stand-in for the catalog API.
#[derive(Clone)]
pub struct FakeUpstream {
    audio: Arc<Vec<u8>>,
    total_size: u64,
    catalog_payload: Arc<Value>,
    archive_body: Arc<Vec<u8>>,
    failure: Option<UpstreamError>,
    range_calls: Arc<AtomicU64>,
    catalog_calls: Arc<AtomicU64>,
    archive_calls: Arc<AtomicU64>,
    last_range: Arc<Mutex<Option<RangeWindow>>>,
}

impl FakeUpstream {
    fn base() -> Self {
        Self {
            audio: Arc::new(Vec::new()),
            total_size: 0,
            catalog_payload: Arc::new(json!([])),
            archive_body: Arc::new(Vec::new()),
            failure: None,
            range_calls: Arc::new(AtomicU64::new(0)),
            catalog_calls: Arc::new(AtomicU64::new(0)),
            archive_calls: Arc::new(AtomicU64::new(0)),
            last_range: Arc::new(Mutex::new(None)),
        }
    }

    /// Serves windows sliced from `audio`; `total_size` feeds content-range.
    pub fn with_audio(audio: Vec<u8>, total_size: u64) -> Self {
        Self {
            audio: Arc::new(audio),
            total_size,
            ..Self::base()
        }
    }

    pub fn with_catalog(payload: Value) -> Self {
        Self {
            catalog_payload: Arc::new(payload),
            ..Self::base()
        }
    }

    pub fn with_archive(body: Vec<u8>) -> Self {
        Self {
            archive_body: Arc::new(body),
            ..Self::base()
        }
    }

    /// Upstream that answers success with an empty body (unknown track).
    pub fn not_found() -> Self {
        Self::base()
    }

    /// Upstream whose every call fails with the given error.
    pub fn failing(error: UpstreamError) -> Self {
        Self {
            failure: Some(error),
            ..Self::base()
        }
    }

    pub fn range_calls(&self) -> u64 {
        self.range_calls.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> u64 {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn archive_calls(&self) -> u64 {
        self.archive_calls.load(Ordering::SeqCst)
    }

    pub fn last_range(&self) -> Option<RangeWindow> {
        *self.last_range.lock().unwrap()
    }
}

#[async_trait]
impl CatalogUpstream for FakeUpstream {
    async fn fetch_range(
        &self,
        _track: &TrackId,
        window: &RangeWindow,
        _params: &[(String, String)],
    ) -> Result<RangeFetch, UpstreamError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_range.lock().unwrap() = Some(*window);

        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }

        let len = self.audio.len() as u64;
        let body = if window.start >= len {
            Vec::new()
        } else {
            let end = window.end.min(len.saturating_sub(1));
            self.audio[window.start as usize..=end as usize].to_vec()
        };
        let served_end = window.start + (body.len() as u64).saturating_sub(1);

        Ok(RangeFetch {
            body,
            content_type: Some("audio/mpeg".to_string()),
            content_range: Some(format!(
                "bytes {}-{}/{}",
                window.start, served_end, self.total_size
            )),
            accept_ranges: Some("bytes".to_string()),
            last_modified: Some("Tue, 01 Jul 2025 00:00:00 GMT".to_string()),
            vary: Some("Accept-Encoding".to_string()),
        })
    }

    async fn catalog(
        &self,
        _path: &str,
        _params: &[(String, String)],
    ) -> Result<Value, UpstreamError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }
        Ok((*self.catalog_payload).clone())
    }

    async fn fetch_archive(&self, _album: &AlbumId, dest: &Path) -> Result<u64, UpstreamError> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }
        tokio::fs::write(dest, self.archive_body.as_slice())
            .await
            .map_err(|e| UpstreamError::Io(e.to_string()))?;
        Ok(self.archive_body.len() as u64)
    }
}

/// Build an [`AppState`] around a fake upstream and the given store. The
/// returned tempdir owns the archive cache directory.
pub async fn test_state(
    upstream: FakeUpstream,
    cache: CacheStore,
) -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let archives = ArchiveCache::new(dir.path().join("archives")).await.unwrap();

    let mut config = Config::default();
    config.upstream.client_id = "test-client".to_string();
    // Keep readiness polling fast in tests.
    config.cache.readiness_attempts = 1;
    config.cache.readiness_delay_secs = 0;

    let state = Arc::new(AppState::new(config, cache, archives, Arc::new(upstream)));
    (state, dir)
}
