use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use super::envelope::Envelope;
use super::range;
use crate::models::{ChunkKey, SignatureDebug, StreamHeaderSet, TrackId};

/// Query parameters the stream route accepts. `chunk_size` is consumed
/// locally; the rest pass through to the upstream call.
const STREAM_PARAMS: &[&str] = &[
    "chunk_size",
    "user_id",
    "preview",
    "skip_play_count",
    "api_key",
    "skip_check",
    "no_redirect",
    "user_data",
];

const UPSTREAM_PARAMS: &[&str] = &[
    "user_id",
    "preview",
    "skip_play_count",
    "api_key",
    "skip_check",
    "no_redirect",
    "user_data",
];

pub async fn stream_track(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state
        .handle_stream(TrackId::from(id), params, &headers)
        .await
}

impl AppState {
    pub(crate) async fn handle_stream(
        &self,
        track: TrackId,
        params: HashMap<String, String>,
        headers: &HeaderMap,
    ) -> Response {
        let started = Instant::now();
        self.stats.increment_request();

        // Streaming only works in ranged mode; a missing (or unusable) Range
        // header is terminal.
        let Some(range_value) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
            return range_required_response();
        };
        self.stats.increment_range_request();

        if let Err((field, message)) = validate_stream_params(&params) {
            let (status, envelope) = Envelope::validation_failure(&field, &message, took_ms(started));
            return (status, envelope).into_response();
        }

        if self.config.upstream.client_id.is_empty() {
            let (status, envelope) =
                Envelope::validation_failure("client_id", "is required", took_ms(started));
            return (status, envelope).into_response();
        }

        let chunk_size = params
            .get("chunk_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.config.cache.chunk_size);

        let Some(window) = range::resolve_window(range_value, chunk_size) else {
            return range_required_response();
        };
        let key = ChunkKey::new(&track, window);

        let cache_ready = self.cache.is_ready()
            || self.cache.wait_ready(&self.readiness_policy()).await;
        if !cache_ready {
            warn!("cache store unavailable, streaming track {} without cache", track);
        }

        if cache_ready
            && let Some(response) = self.replay_cached_chunk(&key, started).await
        {
            return response;
        }
        self.stats.increment_cache_miss();

        let upstream_params = collect_upstream_params(&params);
        let fetched = match self
            .upstream
            .fetch_range(&track, &window, &upstream_params)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                self.stats.increment_upstream_error();
                warn!("upstream range fetch failed for track {}: {}", track, e);
                let (status, envelope) = Envelope::upstream_failure(&e, took_ms(started));
                return (status, envelope).into_response();
            }
        };

        if fetched.body.is_empty() {
            debug!("upstream returned empty body for track {}", track);
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("track {} not found", track) })),
            )
                .into_response();
        }

        let complete = fetched
            .content_range
            .as_deref()
            .map(range::is_final_chunk)
            .unwrap_or(false);
        let header_set = StreamHeaderSet {
            content_type: fetched
                .content_type
                .clone()
                .unwrap_or_else(|| "audio/mpeg".to_string()),
            accept_ranges: fetched
                .accept_ranges
                .clone()
                .unwrap_or_else(|| "bytes".to_string()),
            content_range: fetched.content_range.clone().unwrap_or_else(|| {
                format!("bytes {}-{}/*", window.start, window.end)
            }),
            signature: SignatureDebug::new(),
            last_modified: fetched.last_modified.clone(),
            vary: fetched.vary.clone(),
            complete,
        };

        if cache_ready {
            self.persist_chunk(&key, &fetched.body, &header_set).await;
        }

        let content_length = fetched.body.len() as u64;
        self.stats.add_bytes_served(content_length);
        chunk_response(fetched.body, &header_set, content_length, took_ms(started))
    }

    /// Replay a previously cached chunk, if both the payload and its header
    /// record are present and intact. A chunk with a missing or corrupt
    /// header record is dropped and refetched rather than served with
    /// fabricated headers.
    async fn replay_cached_chunk(&self, key: &ChunkKey, started: Instant) -> Option<Response> {
        let hash = key.hash_key();
        let field = key.field();

        let bytes = match self.cache.hash_get(&hash, &field).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("cache read failed for {}: {}", hash, e);
                return None;
            }
        };

        let cached = match self.cache.hash_get(&hash, ChunkKey::HEADERS_FIELD).await {
            Ok(Some(raw)) => match StreamHeaderSet::from_bytes(&raw) {
                Ok(set) => set,
                Err(e) => {
                    warn!("corrupt cached header record for {}: {}", hash, e);
                    self.drop_stale_chunk(&hash, &field).await;
                    return None;
                }
            },
            Ok(None) => {
                debug!("cached chunk {} has no header record, refetching", hash);
                self.drop_stale_chunk(&hash, &field).await;
                return None;
            }
            Err(e) => {
                warn!("cache read failed for {}: {}", hash, e);
                return None;
            }
        };

        self.stats.increment_cache_hit();
        debug!("cache hit for {} field {}", hash, field);

        // Derive fresh response headers from the immutable cached record;
        // only the debug timestamp changes. A final chunk can be shorter
        // than the window, so the framing follows the cached payload.
        let headers = cached.with_fresh_timestamp();
        let content_length = bytes.len() as u64;
        self.stats.add_bytes_served(content_length);
        Some(chunk_response(bytes, &headers, content_length, took_ms(started)))
    }

    async fn drop_stale_chunk(&self, hash: &str, field: &str) {
        if let Err(e) = self
            .cache
            .hash_delete(hash, &[field, ChunkKey::HEADERS_FIELD])
            .await
        {
            warn!("failed to drop stale chunk {}: {}", hash, e);
        }
    }

    /// Best-effort cache population: a failed write is logged and the
    /// request proceeds with the already-fetched bytes.
    async fn persist_chunk(&self, key: &ChunkKey, body: &[u8], headers: &StreamHeaderSet) {
        let serialized = match headers.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize header record for {}: {}", key.hash_key(), e);
                return;
            }
        };

        let ttl = Some(Duration::from_secs(self.config.cache.ttl_secs));
        let results = self
            .cache
            .hash_set_many(
                &key.hash_key(),
                vec![
                    (key.field(), body.to_vec()),
                    (ChunkKey::HEADERS_FIELD.to_string(), serialized),
                ],
                ttl,
            )
            .await;

        for result in results {
            if let Err(e) = result {
                warn!("cache write failed for {}: {}", key.hash_key(), e);
            }
        }
    }
}

fn validate_stream_params(params: &HashMap<String, String>) -> Result<(), (String, String)> {
    for (name, value) in params {
        if !STREAM_PARAMS.contains(&name.as_str()) {
            return Err((name.clone(), "unknown parameter".to_string()));
        }
        if name == "chunk_size" && !matches!(value.parse::<u64>(), Ok(n) if n > 0) {
            return Err((name.clone(), "must be a positive integer".to_string()));
        }
    }
    Ok(())
}

fn collect_upstream_params(params: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut forwarded: Vec<(String, String)> = params
        .iter()
        .filter(|(name, _)| UPSTREAM_PARAMS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    forwarded.sort();
    forwarded
}

fn range_required_response() -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        Json(json!({ "error": "stream requires range headers" })),
    )
        .into_response()
}

fn chunk_response(
    body: Vec<u8>,
    set: &StreamHeaderSet,
    content_length: u64,
    took_ms: u64,
) -> Response {
    let signature = serde_json::to_string(&set.signature).unwrap_or_default();

    let mut builder = Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, set.content_type.as_str())
        .header(header::CONTENT_LENGTH, content_length.to_string())
        .header(header::ACCEPT_RANGES, set.accept_ranges.as_str())
        .header(header::CONTENT_RANGE, set.content_range.as_str())
        .header("x-complete", if set.complete { "true" } else { "false" })
        .header("x-signature-debug", signature)
        .header("x-took", format!("{}ms", took_ms));

    if let Some(ref last_modified) = set.last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified.as_str());
    }
    if let Some(ref vary) = set.vary {
        builder = builder.header(header::VARY, vary.as_str());
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|e| {
            warn!("failed to build chunk response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

fn took_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::models::RangeWindow;
    use crate::test_utils::{FakeUpstream, test_state};

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, value.parse().unwrap());
        headers
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn missing_range_header_is_terminal_416() {
        let upstream = FakeUpstream::with_audio(vec![1u8; 64], 64);
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;

        let response = state
            .handle_stream(TrackId::from("42"), HashMap::new(), &HeaderMap::new())
            .await;

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "stream requires range headers");
        assert_eq!(upstream.range_calls(), 0);
    }

    #[tokio::test]
    async fn malformed_range_header_is_terminal_416() {
        let upstream = FakeUpstream::with_audio(vec![1u8; 64], 64);
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;

        let response = state
            .handle_stream(
                TrackId::from("42"),
                HashMap::new(),
                &range_headers("bytes=oops"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(upstream.range_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_query_parameter_fails_validation() {
        let upstream = FakeUpstream::with_audio(vec![1u8; 64], 64);
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;

        let mut params = HashMap::new();
        params.insert("surprise".to_string(), "1".to_string());
        let response = state
            .handle_stream(TrackId::from("42"), params, &range_headers("bytes=0-63"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["headers"]["status"], "failed");
        assert_eq!(json["headers"]["code"], 5);
        assert_eq!(upstream.range_calls(), 0);
    }

    #[tokio::test]
    async fn missing_client_id_is_a_required_parameter_error() {
        let upstream = FakeUpstream::with_audio(vec![1u8; 64], 64);
        let dir = tempfile::tempdir().unwrap();
        let archives = crate::cache::ArchiveCache::new(dir.path().join("archives"))
            .await
            .unwrap();
        let state = AppState::new(
            crate::config::Config::default(),
            CacheStore::connect(),
            archives,
            Arc::new(upstream.clone()),
        );

        let response = state
            .handle_stream(
                TrackId::from("42"),
                HashMap::new(),
                &range_headers("bytes=0-63"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["headers"]["code"], 4);
        assert_eq!(upstream.range_calls(), 0);
    }

    #[tokio::test]
    async fn non_numeric_chunk_size_fails_validation() {
        let upstream = FakeUpstream::with_audio(vec![1u8; 64], 64);
        let (state, _dir) = test_state(upstream, CacheStore::connect()).await;

        let mut params = HashMap::new();
        params.insert("chunk_size".to_string(), "lots".to_string());
        let response = state
            .handle_stream(TrackId::from("42"), params, &range_headers("bytes=0-"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn miss_fetches_upstream_and_populates_cache() {
        let audio = (0..4096u32).map(|n| (n % 251) as u8).collect::<Vec<_>>();
        let upstream = FakeUpstream::with_audio(audio.clone(), 4096);
        let cache = CacheStore::connect();
        let (state, _dir) = test_state(upstream.clone(), cache.clone()).await;

        let response = state
            .handle_stream(
                TrackId::from("42"),
                HashMap::new(),
                &range_headers("bytes=0-1023"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, "content-length"), Some("1024"));
        assert_eq!(header(&response, "content-range"), Some("bytes 0-1023/4096"));
        assert_eq!(header(&response, "x-complete"), Some("false"));
        assert!(header(&response, "x-signature-debug").is_some());
        assert!(header(&response, "x-took").is_some());
        assert_eq!(body_bytes(response).await, audio[..1024].to_vec());

        // Cache now holds the payload field and its header record.
        assert!(
            cache
                .hash_get("track.42.chunk", "0.1023")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            cache
                .hash_get("track.42.chunk", ChunkKey::HEADERS_FIELD)
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(upstream.range_calls(), 1);
        assert_eq!(upstream.last_range(), Some(RangeWindow::new(0, 1023)));
    }

    #[tokio::test]
    async fn second_request_replays_from_cache() {
        let audio = vec![7u8; 2048];
        let upstream = FakeUpstream::with_audio(audio.clone(), 2048);
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;
        let track = TrackId::from("42");

        let first = state
            .handle_stream(track.clone(), HashMap::new(), &range_headers("bytes=0-511"))
            .await;
        let first_signature = header(&first, "x-signature-debug").unwrap().to_string();
        let first_body = body_bytes(first).await;

        let second = state
            .handle_stream(track, HashMap::new(), &range_headers("bytes=0-511"))
            .await;
        assert_eq!(second.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&second, "content-length"), Some("512"));
        let second_signature = header(&second, "x-signature-debug").unwrap().to_string();
        let second_body = body_bytes(second).await;

        assert_eq!(first_body, second_body);
        assert_eq!(upstream.range_calls(), 1);

        // Same request id, refreshed timestamp.
        let first_sig: serde_json::Value = serde_json::from_str(&first_signature).unwrap();
        let second_sig: serde_json::Value = serde_json::from_str(&second_signature).unwrap();
        assert_eq!(first_sig["request_id"], second_sig["request_id"]);
        assert_eq!(state.stats.cache_hits(), 1);
    }

    #[tokio::test]
    async fn short_final_chunk_replays_with_matching_length() {
        let audio = vec![6u8; 1000];
        let upstream = FakeUpstream::with_audio(audio.clone(), 1000);
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;
        let track = TrackId::from("13");

        // The track is shorter than the default window, so the cached chunk
        // holds fewer bytes than the requested range.
        let first = state
            .handle_stream(track.clone(), HashMap::new(), &range_headers("bytes=0-"))
            .await;
        assert_eq!(header(&first, "content-length"), Some("1000"));
        assert_eq!(body_bytes(first).await.len(), 1000);

        let second = state
            .handle_stream(track, HashMap::new(), &range_headers("bytes=0-"))
            .await;
        assert_eq!(upstream.range_calls(), 1);
        assert_eq!(header(&second, "content-length"), Some("1000"));
        assert_eq!(header(&second, "x-complete"), Some("true"));
        assert_eq!(body_bytes(second).await.len(), 1000);
    }

    #[tokio::test]
    async fn omitted_end_uses_chunk_size_override() {
        let audio = vec![3u8; 8192];
        let upstream = FakeUpstream::with_audio(audio, 8192);
        let cache = CacheStore::connect();
        let (state, _dir) = test_state(upstream.clone(), cache.clone()).await;

        let mut params = HashMap::new();
        params.insert("chunk_size".to_string(), "4096".to_string());
        let response = state
            .handle_stream(TrackId::from("9"), params, &range_headers("bytes=0-"))
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(upstream.last_range(), Some(RangeWindow::new(0, 4095)));
        assert!(
            cache
                .hash_get("track.9.chunk", "0.4095")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn final_chunk_is_marked_complete() {
        let audio = vec![5u8; 1000];
        let upstream = FakeUpstream::with_audio(audio, 1000);
        let (state, _dir) = test_state(upstream, CacheStore::connect()).await;

        let response = state
            .handle_stream(
                TrackId::from("7"),
                HashMap::new(),
                &range_headers("bytes=900-999"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, "x-complete"), Some("true"));
    }

    #[tokio::test]
    async fn empty_upstream_body_is_404() {
        let upstream = FakeUpstream::not_found();
        let (state, _dir) = test_state(upstream, CacheStore::connect()).await;

        let response = state
            .handle_stream(
                TrackId::from("9999"),
                HashMap::new(),
                &range_headers("bytes=0-1023"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "track 9999 not found");
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_envelope() {
        let upstream = FakeUpstream::failing(crate::upstream::UpstreamError::Timeout);
        let (state, _dir) = test_state(upstream, CacheStore::connect()).await;

        let response = state
            .handle_stream(
                TrackId::from("42"),
                HashMap::new(),
                &range_headers("bytes=0-1023"),
            )
            .await;

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = body_bytes(response).await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["headers"]["error_message"], "upstream request timed out");
    }

    #[tokio::test]
    async fn unavailable_cache_degrades_to_plain_proxying() {
        let audio = vec![9u8; 512];
        let upstream = FakeUpstream::with_audio(audio.clone(), 512);
        let (state, _dir) = test_state(upstream.clone(), CacheStore::offline()).await;
        let track = TrackId::from("42");

        for _ in 0..2 {
            let response = state
                .handle_stream(track.clone(), HashMap::new(), &range_headers("bytes=0-511"))
                .await;
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            assert_eq!(body_bytes(response).await, audio);
        }

        // No cache means every request goes upstream.
        assert_eq!(upstream.range_calls(), 2);
    }

    #[tokio::test]
    async fn missing_header_record_forces_refetch() {
        let audio = vec![4u8; 256];
        let upstream = FakeUpstream::with_audio(audio, 256);
        let cache = CacheStore::connect();
        let (state, _dir) = test_state(upstream.clone(), cache.clone()).await;
        let track = TrackId::from("11");

        state
            .handle_stream(track.clone(), HashMap::new(), &range_headers("bytes=0-255"))
            .await;
        assert_eq!(upstream.range_calls(), 1);

        cache
            .hash_delete("track.11.chunk", &[ChunkKey::HEADERS_FIELD])
            .await
            .unwrap();

        let response = state
            .handle_stream(track, HashMap::new(), &range_headers("bytes=0-255"))
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(upstream.range_calls(), 2);
    }
}
