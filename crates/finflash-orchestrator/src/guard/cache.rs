//! Result cache shared across runs

use async_trait::async_trait;
use cached::{Cached, SizedCache};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Storage for task results keyed by fingerprint
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a non-expired value
    async fn get(&self, fingerprint: &str) -> Option<Value>;

    /// Store a value for `ttl`
    async fn put(&self, fingerprint: &str, value: Value, ttl: Duration);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process cache with per-entry TTL and LRU eviction at capacity
///
/// Expired entries are treated as absent and purged when read.
pub struct TimedResultCache {
    entries: Arc<RwLock<SizedCache<String, CacheEntry>>>,
}

impl TimedResultCache {
    /// Create a new cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(SizedCache::with_size(capacity.max(1)))),
        }
    }

    /// Number of stored entries, expired ones included until they are read
    pub async fn len(&self) -> usize {
        let cache = self.entries.read().await;
        cache.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Clear all cached entries
    pub async fn clear(&self) {
        let mut cache = self.entries.write().await;
        cache.cache_clear();
    }
}

impl Clone for TimedResultCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

#[async_trait]
impl CacheBackend for TimedResultCache {
    async fn get(&self, fingerprint: &str) -> Option<Value> {
        let key = fingerprint.to_string();
        let mut cache = self.entries.write().await;

        match cache.cache_get(&key) {
            None => return None,
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        let _ = cache.cache_remove(&key);
        tracing::debug!(fingerprint, "Purged expired cache entry");
        None
    }

    async fn put(&self, fingerprint: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut cache = self.entries.write().await;
        let _ = cache.cache_set(fingerprint.to_string(), entry);
    }
}
