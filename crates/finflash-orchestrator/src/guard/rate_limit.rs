//! Per-key token buckets backed by governor

use crate::config::RateLimitRule;
use governor::clock::DefaultClock;
use governor::middleware::StateInformationMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

type DirectRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

/// Non-blocking permit source, safe under concurrent callers
#[cfg_attr(test, mockall::automock)]
pub trait RateLimitBackend: Send + Sync {
    /// Take one permit for `key` if available right now
    fn try_acquire(&self, key: &str) -> bool;

    /// Permits `key` could hand out right now, without taking any
    ///
    /// `None` means the key is not limited.
    fn remaining(&self, key: &str) -> Option<u32>;
}

/// One governor bucket plus the capacity it reported on its last check
struct Bucket {
    limiter: DirectRateLimiter,
    burst: u32,
    replenish: Duration,
    last_seen: Mutex<Option<(u32, Instant)>>,
}

impl Bucket {
    fn new(quota: Quota) -> Self {
        Self {
            burst: quota.burst_size().get(),
            replenish: quota.replenish_interval(),
            limiter: RateLimiter::direct(quota).with_middleware::<StateInformationMiddleware>(),
            last_seen: Mutex::new(None),
        }
    }

    fn try_acquire(&self) -> bool {
        let (acquired, left) = match self.limiter.check() {
            Ok(snapshot) => (true, snapshot.remaining_burst_capacity()),
            Err(_) => (false, 0),
        };
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Some((left, Instant::now()));
        }
        acquired
    }

    /// Last observed capacity plus whatever refilled since
    fn remaining(&self) -> u32 {
        let last_seen = self.last_seen.lock().ok().and_then(|guard| *guard);
        let Some((left, seen_at)) = last_seen else {
            return self.burst;
        };

        let refilled = seen_at.elapsed().as_nanos() / self.replenish.as_nanos().max(1);
        let refilled = u32::try_from(refilled).unwrap_or(u32::MAX);
        left.saturating_add(refilled).min(self.burst)
    }
}

/// Token bucket per dependency key
///
/// Keys without a configured rule are never limited.
#[derive(Default)]
pub struct GovernorRateLimiter {
    limiters: HashMap<String, Bucket>,
}

impl GovernorRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one bucket per configured rule
    pub fn from_rules(rules: &BTreeMap<String, RateLimitRule>) -> Self {
        rules
            .iter()
            .fold(Self::new(), |limiter, (key, rule)| limiter.with_rule(key, *rule))
    }

    /// Add a bucket refilling `rule.requests` permits per period, bursting up to the same amount
    pub fn with_rule(mut self, key: impl Into<String>, rule: RateLimitRule) -> Self {
        let key = key.into();

        let Some(burst) = NonZeroU32::new(rule.requests) else {
            tracing::warn!(key = %key, "Ignoring rate limit rule with zero requests");
            return self;
        };
        let Some(quota) = Quota::with_period(rule.period() / burst.get()) else {
            tracing::warn!(key = %key, "Ignoring rate limit rule with zero period");
            return self;
        };

        self.limiters
            .insert(key, Bucket::new(quota.allow_burst(burst)));
        self
    }

    pub fn is_limited(&self, key: &str) -> bool {
        self.limiters.contains_key(key)
    }
}

impl RateLimitBackend for GovernorRateLimiter {
    fn try_acquire(&self, key: &str) -> bool {
        match self.limiters.get(key) {
            Some(bucket) => bucket.try_acquire(),
            None => true,
        }
    }

    fn remaining(&self, key: &str) -> Option<u32> {
        self.limiters.get(key).map(Bucket::remaining)
    }
}
