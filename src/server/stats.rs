use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for the proxy surface, reported periodically via tracing.
#[derive(Debug, Clone)]
pub struct ProxyStats {
    requests: Arc<AtomicU64>,
    range_requests: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
    upstream_errors: Arc<AtomicU64>,
    bytes_served: Arc<AtomicU64>,
    start_time: Instant,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(AtomicU64::new(0)),
            range_requests: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            upstream_errors: Arc::new(AtomicU64::new(0)),
            bytes_served: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn increment_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_range_request(&self) {
        self.range_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn format_report(&self) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let hours = uptime_secs / 3600;
        let minutes = (uptime_secs % 3600) / 60;
        let seconds = uptime_secs % 60;

        let hits = self.cache_hits();
        let misses = self.cache_misses();
        let hit_rate = if hits + misses > 0 {
            (hits as f64 / (hits + misses) as f64) * 100.0
        } else {
            0.0
        };
        let served_mb = self.bytes_served.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);

        format!(
            "📊 Proxy Stats [{}h {}m {}s] | Requests: {} (range: {}) | Cache: {} hits / {} misses ({:.1}%) | Served: {:.1} MB | Upstream errors: {}",
            hours,
            minutes,
            seconds,
            self.requests.load(Ordering::Relaxed),
            self.range_requests.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate,
            served_mb,
            self.upstream_errors.load(Ordering::Relaxed),
        )
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}
