use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::warn;

use super::AppState;
use super::envelope::Envelope;
use crate::models::AlbumId;

/// Query parameters accepted on catalog passthrough routes.
const CATALOG_PARAMS: &[&str] = &[
    "limit",
    "offset",
    "order",
    "id",
    "namesearch",
    "search",
    "tags",
    "artist_id",
    "album_id",
    "audioformat",
];

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn tracks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.catalog_passthrough("tracks", params).await
}

pub async fn albums(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.catalog_passthrough("albums", params).await
}

pub async fn artists(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.catalog_passthrough("artists", params).await
}

pub async fn album_tracks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Response {
    params.insert("album_id".to_string(), id);
    state.catalog_passthrough("tracks", params).await
}

pub async fn album_archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    state.serve_album_archive(AlbumId::from(id)).await
}

impl AppState {
    async fn catalog_passthrough(&self, path: &str, params: HashMap<String, String>) -> Response {
        let started = Instant::now();
        self.stats.increment_request();

        if let Err((field, message)) = validate_catalog_params(&params) {
            let (status, envelope) =
                Envelope::validation_failure(&field, &message, took_ms(started));
            return (status, envelope).into_response();
        }

        if self.config.upstream.client_id.is_empty() {
            let (status, envelope) =
                Envelope::validation_failure("client_id", "is required", took_ms(started));
            return (status, envelope).into_response();
        }

        let mut forwarded: Vec<(String, String)> = params.into_iter().collect();
        forwarded.sort();

        match self.upstream.catalog(path, &forwarded).await {
            Ok(payload) => Envelope::success(extract_results(payload), took_ms(started))
                .into_response(),
            Err(e) => {
                self.stats.increment_upstream_error();
                warn!("catalog call {:?} failed: {}", path, e);
                let (status, envelope) = Envelope::upstream_failure(&e, took_ms(started));
                (status, envelope).into_response()
            }
        }
    }

    async fn serve_album_archive(&self, album: AlbumId) -> Response {
        let started = Instant::now();
        self.stats.increment_request();

        if let Some(path) = self.archives.cached_path(&album).await {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    self.stats.increment_cache_hit();
                    self.stats.add_bytes_served(bytes.len() as u64);
                    return archive_response(&album, bytes);
                }
                Err(e) => warn!("failed to read cached archive {:?}: {}", path, e),
            }
        }
        self.stats.increment_cache_miss();

        let staged = self.archives.staging_path(&album);
        let total = match self.upstream.fetch_archive(&album, &staged).await {
            Ok(total) => total,
            Err(e) => {
                self.stats.increment_upstream_error();
                warn!("archive fetch failed for album {}: {}", album, e);
                let _ = tokio::fs::remove_file(&staged).await;
                let (status, envelope) = Envelope::upstream_failure(&e, took_ms(started));
                return (status, envelope).into_response();
            }
        };

        if total == 0 {
            let _ = tokio::fs::remove_file(&staged).await;
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("album {} not found", album) })),
            )
                .into_response();
        }

        // Promotion is best-effort; a failed rename still serves the staged
        // download.
        let serve_path = match self.archives.commit(&album, &staged).await {
            Ok(path) => path,
            Err(e) => {
                warn!("archive cache commit failed for album {}: {}", album, e);
                staged
            }
        };

        match tokio::fs::read(&serve_path).await {
            Ok(bytes) => {
                self.stats.add_bytes_served(bytes.len() as u64);
                archive_response(&album, bytes)
            }
            Err(e) => {
                warn!("failed to read fetched archive {:?}: {}", serve_path, e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "archive temporarily unavailable" })),
                )
                    .into_response()
            }
        }
    }
}

fn validate_catalog_params(params: &HashMap<String, String>) -> Result<(), (String, String)> {
    for (name, value) in params {
        if !CATALOG_PARAMS.contains(&name.as_str()) {
            return Err((name.clone(), "unknown parameter".to_string()));
        }
        if (name == "limit" || name == "offset") && value.parse::<u64>().is_err() {
            return Err((name.clone(), "must be a non-negative integer".to_string()));
        }
    }
    Ok(())
}

/// The upstream already answers in an envelope of its own; unwrap its results
/// array when present so the payload is not double-wrapped.
fn extract_results(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => map.remove("results").unwrap_or(Value::Array(vec![])),
        other => other,
    }
}

fn archive_response(album: &AlbumId, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"album-{}.zip\"", album);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, bytes.len().to_string())
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from(bytes))
        .unwrap_or_else(|e| {
            warn!("failed to build archive response: {}", e);
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
    use crate::test_utils::{FakeUpstream, test_state};

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn results_extraction_unwraps_upstream_envelopes() {
        let wrapped = json!({"headers": {"status": "success"}, "results": [{"id": 1}]});
        assert_eq!(extract_results(wrapped), json!([{"id": 1}]));

        let bare = json!([{"id": 2}]);
        assert_eq!(extract_results(bare.clone()), bare);

        let no_results = json!({"headers": {}});
        assert_eq!(extract_results(no_results), json!([]));
    }

    #[tokio::test]
    async fn passthrough_wraps_upstream_results() {
        let upstream = FakeUpstream::with_catalog(
            json!({"headers": {"status": "success"}, "results": [{"id": 1}, {"id": 2}]}),
        );
        let (state, _dir) = test_state(upstream, CacheStore::connect()).await;

        let response = state.catalog_passthrough("tracks", HashMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["headers"]["status"], "succeeded");
        assert_eq!(json["headers"]["code"], 0);
        assert_eq!(json["headers"]["results_count"], 2);
    }

    #[tokio::test]
    async fn bad_limit_is_rejected_before_upstream() {
        let upstream = FakeUpstream::with_catalog(json!([]));
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;

        let mut params = HashMap::new();
        params.insert("limit".to_string(), "many".to_string());
        let response = state.catalog_passthrough("tracks", params).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["headers"]["code"], 5);
        assert_eq!(upstream.catalog_calls(), 0);
    }

    #[tokio::test]
    async fn missing_client_id_is_a_required_parameter_error() {
        let upstream = FakeUpstream::with_catalog(json!([]));
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

        let response = state.catalog_passthrough("tracks", HashMap::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["headers"]["code"], 4);
        assert_eq!(upstream.catalog_calls(), 0);
    }

    #[tokio::test]
    async fn archive_is_cached_on_disk_after_first_fetch() {
        let upstream = FakeUpstream::with_archive(b"PK\x03\x04zip-bytes".to_vec());
        let (state, _dir) = test_state(upstream.clone(), CacheStore::connect()).await;
        let album = AlbumId::from("300");

        let first = state.serve_album_archive(album.clone()).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(
            first.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/zip"
        );

        let second = state.serve_album_archive(album).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(upstream.archive_calls(), 1);
    }

    #[tokio::test]
    async fn empty_archive_is_404() {
        let upstream = FakeUpstream::with_archive(Vec::new());
        let (state, _dir) = test_state(upstream, CacheStore::connect()).await;

        let response = state.serve_album_archive(AlbumId::from("301")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "album 301 not found");
    }
}
