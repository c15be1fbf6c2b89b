mod catalog;
mod envelope;
mod range;
mod stats;
mod stream;

pub use envelope::{
    CODE_GENERIC, CODE_MALFORMED_PARAMETER, CODE_REQUIRED_PARAMETER, CODE_SUCCESS, Envelope,
};
pub use stats::ProxyStats;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::{ArchiveCache, CacheStore};
use crate::config::Config;
use crate::upstream::CatalogUpstream;
use crate::utils::retry::RetryPolicy;

/// Explicitly constructed service object shared by all request handlers.
/// Built once at startup and injected through the router state; there are no
/// module-level singletons.
pub struct AppState {
    pub config: Config,
    pub cache: CacheStore,
    pub archives: ArchiveCache,
    pub upstream: Arc<dyn CatalogUpstream>,
    pub stats: ProxyStats,
}

impl AppState {
    pub fn new(
        config: Config,
        cache: CacheStore,
        archives: ArchiveCache,
        upstream: Arc<dyn CatalogUpstream>,
    ) -> Self {
        Self {
            config,
            cache,
            archives,
            upstream,
            stats: ProxyStats::new(),
        }
    }

    pub(crate) fn readiness_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.config.cache.readiness_attempts,
            Duration::from_secs(self.config.cache.readiness_delay_secs),
        )
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(catalog::health))
        .route("/tracks", get(catalog::tracks))
        .route("/albums", get(catalog::albums))
        .route("/artists", get(catalog::artists))
        .route("/albums/:id/tracks", get(catalog::album_tracks))
        .route("/albums/:id/archive", get(catalog::album_archive))
        .route("/tracks/:id/stream", get(stream::stream_track))
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind server address")?;
    let actual_addr = listener.local_addr()?;
    info!("resonix listening on {}", actual_addr);

    if state.config.server.stats_interval_secs > 0 {
        start_stats_reporting(&state);
    }

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn start_stats_reporting(state: &Arc<AppState>) {
    let stats = state.stats.clone();
    let interval_secs = state.config.server.stats_interval_secs;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.tick().await; // Skip first immediate tick

        loop {
            ticker.tick().await;
            info!("{}", stats.format_report());
        }
    });
}
