//! Shared resource guard
//!
//! One guard instance is shared by every run of an orchestrator. It owns the
//! result cache, the rate limiter and the worker slots that bound how many
//! tasks execute at once across all in-flight runs. It never holds a
//! reference to any individual run.

mod cache;
mod rate_limit;

pub use cache::{CacheBackend, TimedResultCache};
pub use rate_limit::{GovernorRateLimiter, RateLimitBackend};

#[cfg(test)]
pub use rate_limit::MockRateLimitBackend;

use crate::config::OrchestratorConfig;
use finflash_core::TaskKind;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

const PERMIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cache, rate limiter and worker pool shared across runs
pub struct SharedResourceGuard {
    cache: Arc<dyn CacheBackend>,
    limiter: Arc<dyn RateLimitBackend>,
    slots: Arc<Semaphore>,
    max_slots: usize,
}

impl SharedResourceGuard {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        limiter: Arc<dyn RateLimitBackend>,
        max_slots: usize,
    ) -> Self {
        let max_slots = max_slots.max(1);
        Self {
            cache,
            limiter,
            slots: Arc::new(Semaphore::new(max_slots)),
            max_slots,
        }
    }

    /// Guard with the in-process cache and governor buckets described by `config`
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            Arc::new(TimedResultCache::new(config.cache_capacity)),
            Arc::new(GovernorRateLimiter::from_rules(&config.rate_limits)),
            config.max_concurrent_tasks,
        )
    }

    pub async fn cache_get(&self, fingerprint: &str) -> Option<Value> {
        self.cache.get(fingerprint).await
    }

    pub async fn cache_put(&self, fingerprint: &str, value: Value, ttl: Duration) {
        self.cache.put(fingerprint, value, ttl).await;
    }

    /// Non-blocking permit check
    pub fn try_acquire(&self, key: &str) -> bool {
        self.limiter.try_acquire(key)
    }

    /// Wait up to `wait` for a rate-limit permit
    ///
    /// Returns `false` when no permit became available in time.
    pub async fn acquire_permit(&self, key: &str, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if self.limiter.try_acquire(key) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(PERMIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Wait for a free worker slot; the slot is released on drop
    ///
    /// Returns `None` only if the pool was closed.
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.ok()
    }

    /// Whether one task per entry of `limit_keys` could start right now
    ///
    /// Needs a free worker for every task and, for each limited key, enough
    /// rate-limit permits to cover the tasks sharing it. Nothing is consumed.
    pub fn has_budget(&self, limit_keys: &[&str]) -> bool {
        if self.slots.available_permits() < limit_keys.len() {
            return false;
        }

        let mut needed: BTreeMap<&str, u32> = BTreeMap::new();
        for key in limit_keys {
            *needed.entry(*key).or_default() += 1;
        }
        needed.into_iter().all(|(key, count)| {
            self.limiter
                .remaining(key)
                .is_none_or(|left| left >= count)
        })
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}

/// Cache key of a task invocation: SHA-256 over the kind and canonical JSON input
///
/// Object keys are written in sorted order so equal inputs always hash equally.
pub fn fingerprint(kind: &TaskKind, input: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(input, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guard_with(limiter: MockRateLimitBackend, slots: usize) -> SharedResourceGuard {
        SharedResourceGuard::new(Arc::new(TimedResultCache::new(16)), Arc::new(limiter), slots)
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = json!({"payload": {"content": "x", "kind": "text"}, "upstream": {}});
        let b = json!({"upstream": {}, "payload": {"kind": "text", "content": "x"}});

        assert_eq!(
            fingerprint(&TaskKind::COLLECT_TEXT, &a),
            fingerprint(&TaskKind::COLLECT_TEXT, &b)
        );
        assert_eq!(fingerprint(&TaskKind::COLLECT_TEXT, &a).len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_kind_and_input() {
        let input = json!({"payload": "x"});
        let base = fingerprint(&TaskKind::ANALYZE_RISK, &input);

        assert_ne!(base, fingerprint(&TaskKind::ANALYZE_SENTIMENT, &input));
        assert_ne!(base, fingerprint(&TaskKind::ANALYZE_RISK, &json!({"payload": "y"})));
        assert_ne!(
            fingerprint(&TaskKind::ANALYZE_RISK, &json!(["a", "b"])),
            fingerprint(&TaskKind::ANALYZE_RISK, &json!(["b", "a"]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_permit_gives_up_after_wait() {
        let mut limiter = MockRateLimitBackend::new();
        limiter.expect_try_acquire().returning(|_| false);
        let guard = guard_with(limiter, 1);

        let start = Instant::now();
        assert!(!guard.acquire_permit("openai", Duration::from_millis(200)).await);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_permit_waits_for_refill() {
        let mut limiter = MockRateLimitBackend::new();
        let mut seq = mockall::Sequence::new();
        limiter
            .expect_try_acquire()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| false);
        limiter
            .expect_try_acquire()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| true);
        let guard = guard_with(limiter, 1);

        assert!(guard.acquire_permit("openai", Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_slots_bound_budget() {
        let mut limiter = MockRateLimitBackend::new();
        limiter.expect_remaining().returning(|_| None);
        let guard = guard_with(limiter, 2);

        assert!(guard.has_budget(&["a", "b"]));
        let first = guard.acquire_slot().await.unwrap();
        assert!(!guard.has_budget(&["a", "b"]));
        assert!(guard.has_budget(&["a"]));

        drop(first);
        assert_eq!(guard.available_slots(), guard.max_slots());
    }

    #[test]
    fn test_rate_budget_bounds_budget() {
        let mut limiter = MockRateLimitBackend::new();
        limiter
            .expect_remaining()
            .returning(|key| if key == "openai" { Some(2) } else { None });
        let guard = guard_with(limiter, 5);

        assert!(guard.has_budget(&["openai", "openai", "collect-text"]));
        assert!(!guard.has_budget(&["openai", "openai", "openai"]));
        assert!(guard.has_budget(&["exa", "exa", "exa", "exa"]));
    }

    #[test]
    fn test_exhausted_limiter_has_no_budget() {
        let mut limiter = MockRateLimitBackend::new();
        limiter.expect_remaining().returning(|_| Some(0));
        limiter.expect_try_acquire().never();
        let guard = guard_with(limiter, 5);

        assert!(!guard.has_budget(&["openai"]));
        assert!(guard.has_budget(&[]));
    }

    #[tokio::test]
    async fn test_cache_roundtrip_through_guard() {
        let config = OrchestratorConfig::default();
        let guard = SharedResourceGuard::from_config(&config);

        assert!(guard.cache_get("fp").await.is_none());
        guard.cache_put("fp", json!({"ok": true}), config.cache_ttl()).await;
        assert_eq!(guard.cache_get("fp").await, Some(json!({"ok": true})));
        assert!(guard.try_acquire("collect-text"));
    }
}
