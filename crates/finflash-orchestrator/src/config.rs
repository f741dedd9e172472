//! Configuration for the orchestration engine

use crate::pipeline;
use crate::retry::RetryPolicy;
use finflash_core::{Error, Result, TaskKind};
use finflash_utils::env_override;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Token-bucket budget for one rate-limit key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Permits available per period (also the burst size)
    pub requests: u32,
    pub period_secs: u64,
}

impl RateLimitRule {
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            period_secs: 60,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Backoff between task attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Configuration for the orchestrator, its runner and the shared resource guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Size of the worker pool shared by every in-flight run
    pub max_concurrent_tasks: usize,

    /// Wall-clock limit of one capability attempt
    pub task_timeout_secs: u64,

    /// Per-kind overrides of `task_timeout_secs`
    pub task_timeouts_secs: BTreeMap<TaskKind, u64>,

    /// Retries after the first attempt
    pub max_retries: u32,

    pub retry: RetrySettings,

    /// Bounded wait for a rate-limit permit
    pub rate_limit_wait_ms: u64,

    pub cache_ttl_secs: u64,

    pub cache_capacity: usize,

    /// Adaptive mode runs a wave concurrently only above this many tasks
    pub adaptive_threshold: usize,

    /// Run deadline = sum of per-task timeouts * multiplier
    pub run_deadline_multiplier: f64,

    /// Rate-limit rules keyed by dependency key; unknown keys are unlimited
    pub rate_limits: BTreeMap<String, RateLimitRule>,

    /// Groups of task kinds; each group present in a run needs one success
    /// for the run to count as a partial failure instead of a failure
    pub minimum_viable: Vec<BTreeSet<TaskKind>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut rate_limits = BTreeMap::new();
        rate_limits.insert("openai".to_string(), RateLimitRule::per_minute(60));
        rate_limits.insert("exa".to_string(), RateLimitRule::per_minute(100));

        Self {
            max_concurrent_tasks: 5,
            task_timeout_secs: 30,
            task_timeouts_secs: BTreeMap::new(),
            max_retries: 2,
            retry: RetrySettings::default(),
            rate_limit_wait_ms: 5_000,
            cache_ttl_secs: 300,
            cache_capacity: 1024,
            adaptive_threshold: 1,
            run_deadline_multiplier: 2.0,
            rate_limits,
            minimum_viable: pipeline::default_minimum_viable(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration builder
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Apply `FINFLASH_*` environment overrides
    ///
    /// Invalid values are logged and ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_override("FINFLASH_MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = v;
        }
        if let Some(v) = env_override("FINFLASH_TASK_TIMEOUT_SECS") {
            self.task_timeout_secs = v;
        }
        if let Some(v) = env_override("FINFLASH_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_override("FINFLASH_CACHE_TTL_SECS") {
            self.cache_ttl_secs = v;
        }
        if let Some(v) = env_override("FINFLASH_ADAPTIVE_THRESHOLD") {
            self.adaptive_threshold = v;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }

        if self.task_timeout_secs == 0 {
            return Err(Error::Config(
                "task_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if let Some((kind, _)) = self.task_timeouts_secs.iter().find(|(_, secs)| **secs == 0) {
            return Err(Error::Config(format!(
                "timeout override for {kind} must be greater than 0"
            )));
        }

        if self.cache_capacity == 0 {
            return Err(Error::Config(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }

        if !(self.run_deadline_multiplier > 0.0 && self.run_deadline_multiplier.is_finite()) {
            return Err(Error::Config(
                "run_deadline_multiplier must be a positive number".to_string(),
            ));
        }

        if !(self.retry.backoff_multiplier >= 1.0 && self.retry.backoff_multiplier.is_finite()) {
            return Err(Error::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if let Some((key, _)) = self
            .rate_limits
            .iter()
            .find(|(_, rule)| rule.requests == 0 || rule.period_secs == 0)
        {
            return Err(Error::Config(format!(
                "rate limit for '{key}' needs non-zero requests and period"
            )));
        }

        Ok(())
    }

    /// Attempt timeout for a task kind
    pub fn task_timeout(&self, kind: &TaskKind) -> Duration {
        let secs = self
            .task_timeouts_secs
            .get(kind)
            .copied()
            .unwrap_or(self.task_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    /// Retry policy derived from `max_retries` and `retry`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
            self.retry.backoff_multiplier,
        )
    }
}

/// Builder for OrchestratorConfig
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    max_concurrent_tasks: Option<usize>,
    task_timeout_secs: Option<u64>,
    task_timeouts_secs: BTreeMap<TaskKind, u64>,
    max_retries: Option<u32>,
    retry: Option<RetrySettings>,
    rate_limit_wait_ms: Option<u64>,
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<usize>,
    adaptive_threshold: Option<usize>,
    run_deadline_multiplier: Option<f64>,
    rate_limits: Option<BTreeMap<String, RateLimitRule>>,
    minimum_viable: Option<Vec<BTreeSet<TaskKind>>>,
}

impl OrchestratorConfigBuilder {
    /// Set the shared worker pool size
    pub fn max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.max_concurrent_tasks = Some(tasks);
        self
    }

    /// Set the default attempt timeout
    pub fn task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = Some(secs);
        self
    }

    /// Override the attempt timeout of one task kind
    pub fn task_timeout_for(mut self, kind: impl Into<TaskKind>, secs: u64) -> Self {
        self.task_timeouts_secs.insert(kind.into(), secs);
        self
    }

    /// Set maximum retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set backoff settings
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn rate_limit_wait_ms(mut self, millis: u64) -> Self {
        self.rate_limit_wait_ms = Some(millis);
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn adaptive_threshold(mut self, threshold: usize) -> Self {
        self.adaptive_threshold = Some(threshold);
        self
    }

    pub fn run_deadline_multiplier(mut self, multiplier: f64) -> Self {
        self.run_deadline_multiplier = Some(multiplier);
        self
    }

    /// Add or replace the rule for one rate-limit key
    pub fn rate_limit(mut self, key: impl Into<String>, rule: RateLimitRule) -> Self {
        self.rate_limits
            .get_or_insert_with(|| OrchestratorConfig::default().rate_limits)
            .insert(key.into(), rule);
        self
    }

    /// Replace the minimum viable groups
    pub fn minimum_viable(mut self, groups: Vec<BTreeSet<TaskKind>>) -> Self {
        self.minimum_viable = Some(groups);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<OrchestratorConfig> {
        let defaults = OrchestratorConfig::default();

        let config = OrchestratorConfig {
            max_concurrent_tasks: self
                .max_concurrent_tasks
                .unwrap_or(defaults.max_concurrent_tasks),
            task_timeout_secs: self.task_timeout_secs.unwrap_or(defaults.task_timeout_secs),
            task_timeouts_secs: self.task_timeouts_secs,
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry: self.retry.unwrap_or(defaults.retry),
            rate_limit_wait_ms: self
                .rate_limit_wait_ms
                .unwrap_or(defaults.rate_limit_wait_ms),
            cache_ttl_secs: self.cache_ttl_secs.unwrap_or(defaults.cache_ttl_secs),
            cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
            adaptive_threshold: self
                .adaptive_threshold
                .unwrap_or(defaults.adaptive_threshold),
            run_deadline_multiplier: self
                .run_deadline_multiplier
                .unwrap_or(defaults.run_deadline_multiplier),
            rate_limits: self.rate_limits.unwrap_or(defaults.rate_limits),
            minimum_viable: self.minimum_viable.unwrap_or(defaults.minimum_viable),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_policy().max_attempts(), 3);
        assert_eq!(config.task_timeout(&TaskKind::ANALYZE_RISK), Duration::from_secs(30));
        assert_eq!(config.rate_limits["openai"], RateLimitRule::per_minute(60));
        assert_eq!(config.rate_limits["exa"].requests, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = OrchestratorConfig::builder()
            .max_concurrent_tasks(2)
            .task_timeout_secs(5)
            .task_timeout_for(TaskKind::COLLECT_AUDIO, 120)
            .max_retries(0)
            .adaptive_threshold(3)
            .rate_limit("newsapi", RateLimitRule::per_minute(10))
            .build()
            .unwrap();

        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.task_timeout(&TaskKind::COLLECT_TEXT), Duration::from_secs(5));
        assert_eq!(
            config.task_timeout(&TaskKind::COLLECT_AUDIO),
            Duration::from_secs(120)
        );
        assert_eq!(config.retry_policy().max_attempts(), 1);
        assert!(config.rate_limits.contains_key("openai"));
        assert!(config.rate_limits.contains_key("newsapi"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(OrchestratorConfig::builder().max_concurrent_tasks(0).build().is_err());
        assert!(OrchestratorConfig::builder().task_timeout_secs(0).build().is_err());
        assert!(
            OrchestratorConfig::builder()
                .run_deadline_multiplier(0.0)
                .build()
                .is_err()
        );

        let err = OrchestratorConfig::builder()
            .retry(RetrySettings {
                backoff_multiplier: 0.5,
                ..RetrySettings::default()
            })
            .build()
            .unwrap_err();
        assert!(err.is_configuration_error());

        let err = OrchestratorConfig::builder()
            .rate_limit("openai", RateLimitRule::per_minute(0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"max_concurrent_tasks": 8, "task_timeouts_secs": {"collect-audio": 90}}"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.task_timeout_secs, 30);
        assert_eq!(
            config.task_timeout(&TaskKind::COLLECT_AUDIO),
            Duration::from_secs(90)
        );
        assert_eq!(config.minimum_viable.len(), 2);
    }
}
