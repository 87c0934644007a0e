use crate::data_sync::transport::{RequestOptions, Transport};
use crate::error::{RefreshError, RefreshResult};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type SharedResponse = Shared<BoxFuture<'static, RefreshResult<Value>>>;

/// A successful response stored under its request fingerprint
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: String, payload: Value, ttl: Duration) -> Self {
        Self { key, payload, stored_at: Instant::now(), ttl }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Callers that joined an already pending request
    pub deduplicated: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

struct CacheInner {
    transport: Arc<dyn Transport>,
    entries: DashMap<String, CacheEntry, RandomState>,
    // at most one per fingerprint, removed on settlement
    pending: DashMap<String, SharedResponse, RandomState>,
    ttl_ms: AtomicU64,
    stats: CacheStats,
}

impl CacheInner {
    fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }
}

/// Removes the pending entry when the request task ends, including on panic.
struct PendingGuard {
    inner: Arc<CacheInner>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.remove(&self.key);
    }
}

/// Response cache with in-flight request deduplication.
///
/// Reads (`GET`) are served from a fresh cache entry when one exists, join the
/// pending request for the same fingerprint when one is in flight, and
/// otherwise issue exactly one transport call. The call runs on its own tokio
/// task, so a caller that goes away does not cancel it and the response is
/// still cached.
#[derive(Clone)]
pub struct CachedClient {
    inner: Arc<CacheInner>,
}

impl CachedClient {
    pub fn new(transport: Arc<dyn Transport>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                transport,
                entries: DashMap::with_hasher(RandomState::new()),
                pending: DashMap::with_hasher(RandomState::new()),
                ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
                stats: CacheStats::default(),
            }),
        }
    }

    pub async fn cached_request(&self, endpoint: &str, options: RequestOptions) -> RefreshResult<Value> {
        if !options.method.is_read() {
            return self.inner.transport.send(endpoint, &options).await;
        }

        let key = options.fingerprint(endpoint);
        if let Some(payload) = self.lookup(&key) {
            debug!("Cache hit for {}", key);
            return Ok(payload);
        }

        let response = match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(pending) => {
                self.inner.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!("Joining in-flight request for {}", key);
                pending.get().clone()
            }
            Entry::Vacant(slot) => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                let response = self.issue(key, endpoint.to_string(), options);
                slot.insert(response.clone());
                response
            }
        };

        response.await
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let fresh = match self.inner.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.payload.clone()),
            Some(_) => None,
            None => return None,
        };

        match fresh {
            Some(payload) => {
                self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            None => {
                if self.inner.entries.remove_if(key, |_, entry| !entry.is_fresh(now)).is_some() {
                    self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    fn issue(&self, key: String, endpoint: String, options: RequestOptions) -> SharedResponse {
        let inner = Arc::clone(&self.inner);
        let task_endpoint = endpoint.clone();

        let handle = tokio::spawn(async move {
            let guard = PendingGuard { inner: Arc::clone(&inner), key: key.clone() };
            let result = inner.transport.send(&task_endpoint, &options).await;
            match &result {
                Ok(payload) => {
                    let entry = CacheEntry::new(key.clone(), payload.clone(), inner.ttl());
                    inner.entries.insert(key, entry);
                }
                Err(e) => warn!("Request {} failed, not cached: {}", task_endpoint, e),
            }
            drop(guard);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(RefreshError::network(endpoint, format!("request task ended abnormally: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    /// Drop every cached response. In-flight requests are unaffected.
    pub fn clear_cache(&self) {
        self.inner.entries.clear();
    }

    /// Change the TTL given to entries stored from now on.
    pub fn set_cache_timeout(&self, ttl: Duration) {
        self.inner.ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn cache_timeout(&self) -> Duration {
        self.inner.ttl()
    }

    /// Drop the cached response for one request, if any.
    pub fn invalidate(&self, endpoint: &str, options: &RequestOptions) -> bool {
        self.inner.entries.remove(&options.fingerprint(endpoint)).is_some()
    }

    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.inner.entries.retain(|_, entry| {
            let fresh = entry.is_fresh(now);
            if !fresh {
                self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
            fresh
        });
    }

    pub fn cache_size(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }
}
