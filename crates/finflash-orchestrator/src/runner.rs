//! Task runner: cache gate, rate-limit permit, timeout and retry
//!
//! [`TaskRunner::run`] turns one task invocation into exactly one
//! [`ResultEnvelope`], whatever the capability does. The only suspension
//! points are the capability call, the rate-limit wait and the backoff
//! between attempts. A worker slot is held only while the capability runs.

use crate::config::OrchestratorConfig;
use crate::guard::{SharedResourceGuard, fingerprint};
use crate::retry::RetryPolicy;
use finflash_core::{Capability, ErrorKind, ResultEnvelope, TaskContext, TaskDescriptor, TaskKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Executes task invocations against the shared resource guard
pub struct TaskRunner {
    guard: Arc<SharedResourceGuard>,
    retry: RetryPolicy,
    default_timeout: Duration,
    timeouts: BTreeMap<TaskKind, Duration>,
    cache_ttl: Duration,
    rate_limit_wait: Duration,
}

impl TaskRunner {
    pub fn new(guard: Arc<SharedResourceGuard>, config: &OrchestratorConfig) -> Self {
        Self {
            guard,
            retry: config.retry_policy(),
            default_timeout: Duration::from_secs(config.task_timeout_secs),
            timeouts: config
                .task_timeouts_secs
                .iter()
                .map(|(kind, secs)| (kind.clone(), Duration::from_secs(*secs)))
                .collect(),
            cache_ttl: config.cache_ttl(),
            rate_limit_wait: config.rate_limit_wait(),
        }
    }

    pub fn guard(&self) -> &Arc<SharedResourceGuard> {
        &self.guard
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Attempt timeout for a task kind
    pub fn timeout_for(&self, kind: &TaskKind) -> Duration {
        self.timeouts
            .get(kind)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Run one task to a terminal envelope
    pub async fn run(
        &self,
        descriptor: &TaskDescriptor,
        capability: &dyn Capability,
        input: Value,
        ctx: &TaskContext,
    ) -> ResultEnvelope {
        let kind = &descriptor.kind;
        let started = Instant::now();

        let fp = fingerprint(kind, &input);
        if let Some(value) = self.guard.cache_get(&fp).await {
            debug!(run_id = %ctx.run_id, task = %kind, "Cache hit");
            return ResultEnvelope::cached(kind.clone(), value);
        }

        let timeout = self.timeout_for(kind);
        let max_attempts = self.retry.max_attempts();
        let mut last_failure = (ErrorKind::AgentExecution, String::new());

        for attempt in 1..=max_attempts {
            debug!(
                run_id = %ctx.run_id,
                task = %kind,
                attempt,
                max_attempts,
                capability = capability.name(),
                "Attempting task"
            );

            if !self
                .guard
                .acquire_permit(descriptor.limit_key(), self.rate_limit_wait)
                .await
            {
                last_failure = (
                    ErrorKind::RateLimitExceeded,
                    format!(
                        "no rate-limit permit for '{}' within {:?}",
                        descriptor.limit_key(),
                        self.rate_limit_wait
                    ),
                );
            } else {
                let Some(slot) = self.guard.acquire_slot().await else {
                    return ResultEnvelope::failure(
                        kind.clone(),
                        ErrorKind::AgentExecution,
                        "worker pool is closed",
                        attempt,
                        None,
                        started.elapsed(),
                    );
                };
                let attempt_ctx = ctx.for_attempt(attempt);
                let outcome =
                    tokio::time::timeout(timeout, capability.invoke(input.clone(), &attempt_ctx))
                        .await;
                drop(slot);

                match outcome {
                    Ok(Ok(value)) => {
                        self.guard.cache_put(&fp, value.clone(), self.cache_ttl).await;
                        if attempt > 1 {
                            debug!(task = %kind, attempt, "Task succeeded after retries");
                        }
                        return ResultEnvelope::success(
                            kind.clone(),
                            value,
                            attempt,
                            started.elapsed(),
                        );
                    }
                    Ok(Err(err)) if !err.retryable => {
                        warn!(
                            run_id = %ctx.run_id,
                            task = %kind,
                            attempt,
                            error = %err,
                            "Task failed with non-retryable error"
                        );
                        return ResultEnvelope::failure(
                            kind.clone(),
                            ErrorKind::AgentExecution,
                            err.message,
                            attempt,
                            Some(ErrorKind::AgentExecution),
                            started.elapsed(),
                        );
                    }
                    Ok(Err(err)) => {
                        last_failure = (ErrorKind::AgentExecution, err.message);
                    }
                    Err(_) => {
                        last_failure = (
                            ErrorKind::AgentTimeout,
                            format!("attempt timed out after {timeout:?}"),
                        );
                    }
                }
            }

            if attempt < max_attempts {
                let backoff = self.retry.backoff_duration(attempt);
                warn!(
                    run_id = %ctx.run_id,
                    task = %kind,
                    attempt,
                    error_kind = %last_failure.0,
                    error = %last_failure.1,
                    "Task attempt failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        let (cause, message) = last_failure;
        warn!(
            run_id = %ctx.run_id,
            task = %kind,
            attempts = max_attempts,
            cause = %cause,
            "Task exhausted its attempts"
        );
        ResultEnvelope::failure(
            kind.clone(),
            ErrorKind::AgentExecution,
            message,
            max_attempts,
            Some(cause),
            started.elapsed(),
        )
    }
}
