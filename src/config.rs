use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Interval for the periodic stats report; 0 disables it.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Application identifier required by the upstream catalog API.
    #[serde(default)]
    pub client_id: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default byte window size when a range request omits its end.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Time-to-live for cached audio chunks.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Bounded readiness polling before the store is treated as unavailable.
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    #[serde(default = "default_readiness_delay")]
    pub readiness_delay_secs: u64,

    /// Directory for cached album archives; platform cache dir when unset.
    pub archive_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3900
}

fn default_stats_interval() -> u64 {
    30
}

fn default_base_url() -> String {
    "https://api.jamendo.com/v3.0/".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_readiness_attempts() -> u32 {
    10
}

fn default_readiness_delay() -> u64 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            client_id: String::new(),
            timeout_secs: default_timeout(),
            max_retries: default_retries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            chunk_size: default_chunk_size(),
            ttl_secs: default_ttl(),
            readiness_attempts: default_readiness_attempts(),
            readiness_delay_secs: default_readiness_delay(),
            archive_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let config = if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded successfully");
            config
        } else {
            info!("No config file found, using defaults");
            let config = Config::default();
            config.save()?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, contents).context("Failed to write config file")?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("RESONIX_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
        Ok(config_dir.join("resonix").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.chunk_size == 0 {
            return Err(anyhow::anyhow!("cache.chunk_size must be greater than 0"));
        }

        if self.cache.ttl_secs == 0 {
            return Err(anyhow::anyhow!("cache.ttl_secs must be greater than 0"));
        }

        if self.cache.readiness_attempts == 0 {
            return Err(anyhow::anyhow!(
                "cache.readiness_attempts must be greater than 0"
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "upstream.timeout_secs must be greater than 0"
            ));
        }

        url::Url::parse(&self.upstream.base_url)
            .map_err(|e| anyhow::anyhow!("upstream.base_url is not a valid URL: {}", e))?;

        Ok(())
    }

    /// Archive cache directory: configured path or the platform cache dir.
    pub fn archive_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache.archive_dir {
            Ok(dir.clone())
        } else {
            let cache_dir = dirs::cache_dir()
                .ok_or_else(|| anyhow::anyhow!("Failed to get cache directory"))?;
            Ok(cache_dir.join("resonix").join("archives"))
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .context("Invalid server host/port")
    }
}
