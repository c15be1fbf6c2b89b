use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use resonix::cache::{ArchiveCache, CacheStore};
use resonix::config::Config;
use resonix::server::{self, AppState};
use resonix::upstream::JamendoClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resonix=debug,info")),
        )
        .init();

    info!("Starting resonix backend");

    let config = Config::load()?;

    let cache = if config.cache.enabled {
        CacheStore::connect()
    } else {
        info!("chunk caching disabled by configuration");
        CacheStore::offline()
    };

    let archives = ArchiveCache::new(config.archive_dir()?).await?;
    let upstream = Arc::new(JamendoClient::new(&config.upstream)?);
    let addr = config.bind_addr()?;

    let state = Arc::new(AppState::new(config, cache, archives, upstream));
    server::serve(state, addr).await
}
