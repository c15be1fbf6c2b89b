use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::utils::retry::{self, RetryPolicy};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("cache store is not available")]
    Unavailable,
}

/// Result of a single hash-field write. The field write and the hash-level
/// expiry refresh are reported independently, mirroring the store contract
/// that they are separate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashWrite {
    pub written: bool,
    pub expiry_set: bool,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct HashEntry {
    fields: HashMap<String, Vec<u8>>,
    expires_at: Option<Instant>,
}

impl HashEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    strings: HashMap<String, Entry>,
    hashes: HashMap<String, HashEntry>,
}

/// Process-wide in-memory key/value and hash-field store with expiry.
///
/// Entries are immutable for their TTL: there is no partial-update path, a
/// key or field is only ever rewritten wholesale. TTL on hashes is
/// hash-scoped, so writing any field refreshes expiry for the whole hash.
///
/// The store carries an explicit readiness flag. Callers that arrive before
/// the store is available poll via [`CacheStore::wait_ready`]; a store that
/// never becomes ready degrades every operation to a miss, and the service is
/// expected to stay correct (merely slower) without it.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<RwLock<StoreInner>>,
    ready: Arc<AtomicBool>,
    disabled: Arc<AtomicBool>,
}

impl CacheStore {
    /// Create a connected store and start its background expiry sweeper.
    pub fn connect() -> Self {
        let store = Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            ready: Arc::new(AtomicBool::new(true)),
            disabled: Arc::new(AtomicBool::new(false)),
        };
        store.spawn_sweeper();
        debug!("cache store connected");
        store
    }

    /// Create a permanently unavailable store. Used when caching is disabled
    /// in configuration; every operation reports [`CacheError::Unavailable`].
    pub fn offline() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            ready: Arc::new(AtomicBool::new(false)),
            disabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a store whose connection completes only after `delay`.
    #[cfg(test)]
    pub(crate) fn connect_delayed(delay: Duration) -> Self {
        let store = Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            ready: Arc::new(AtomicBool::new(false)),
            disabled: Arc::new(AtomicBool::new(false)),
        };
        let ready = store.ready.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ready.store(true, Ordering::SeqCst);
        });
        store
    }

    fn spawn_sweeper(&self) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        let now = Instant::now();
                        let mut guard = inner.write().await;
                        let before = guard.strings.len() + guard.hashes.len();
                        guard.strings.retain(|_, e| !e.is_expired(now));
                        guard.hashes.retain(|_, h| !h.is_expired(now));
                        let swept = before - (guard.strings.len() + guard.hashes.len());
                        if swept > 0 {
                            trace!("expiry sweep dropped {} entries", swept);
                        }
                    }
                    None => break,
                }
            }
        });
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Poll readiness under a bounded policy. Returns `false` once the policy
    /// is exhausted or immediately for a disabled store.
    pub async fn wait_ready(&self, policy: &RetryPolicy) -> bool {
        if self.disabled.load(Ordering::SeqCst) {
            return false;
        }
        retry::retry(policy, || async {
            if self.is_ready() {
                Ok(())
            } else {
                Err(CacheError::Unavailable)
            }
        })
        .await
        .is_ok()
    }

    fn check_ready(&self) -> Result<(), CacheError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }

    fn expiry(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|ttl| Instant::now() + ttl)
    }

    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.check_ready()?;
        let mut inner = self.inner.write().await;
        inner.strings.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Self::expiry(ttl),
            },
        );
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_ready()?;
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        match inner.strings.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Read one field of a hash. Values are raw bytes; callers decide how to
    /// decode them.
    pub async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_ready()?;
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        match inner.hashes.get(hash) {
            Some(entry) if !entry.is_expired(now) => Ok(entry.fields.get(field).cloned()),
            Some(_) => {
                inner.hashes.remove(hash);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Write one field of a hash and refresh the hash-scoped expiry.
    pub async fn hash_set(
        &self,
        hash: &str,
        field: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<HashWrite, CacheError> {
        self.check_ready()?;
        let mut inner = self.inner.write().await;
        let entry = inner.hashes.entry(hash.to_string()).or_insert(HashEntry {
            fields: HashMap::new(),
            expires_at: None,
        });
        entry.fields.insert(field.to_string(), value);
        let expiry_set = ttl.is_some();
        entry.expires_at = Self::expiry(ttl).or(entry.expires_at);
        Ok(HashWrite {
            written: true,
            expiry_set,
        })
    }

    /// Batched field writes. Each write succeeds or fails independently;
    /// callers must treat partial success as possible.
    pub async fn hash_set_many(
        &self,
        hash: &str,
        fields: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> Vec<Result<HashWrite, CacheError>> {
        let mut results = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            results.push(self.hash_set(hash, &field, value, ttl).await);
        }
        results
    }

    /// Remove fields from a hash, returning how many existed. Dropping the
    /// last field removes the hash itself.
    pub async fn hash_delete(&self, hash: &str, fields: &[&str]) -> Result<usize, CacheError> {
        self.check_ready()?;
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.hashes.get_mut(hash) else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            if entry.fields.remove(*field).is_some() {
                removed += 1;
            }
        }
        if entry.fields.is_empty() {
            inner.hashes.remove(hash);
        }
        Ok(removed)
    }
}
