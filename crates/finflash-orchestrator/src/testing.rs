//! Scripted capability doubles shared by the unit tests

use async_trait::async_trait;
use finflash_core::{Capability, CapabilityError, TaskContext};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    /// Retryable error on every attempt
    FailTransient,
    /// Non-retryable error on the first attempt
    FailFatal,
    /// Retryable error on the first `n` attempts, then success
    FailTimes(u32),
    /// Never returns within any sane timeout
    Hang,
}

pub struct ScriptedCapability {
    name: String,
    script: Script,
    delay: Duration,
    calls: AtomicU32,
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedCapability {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            log: None,
        }
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, Script::Succeed))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Append the invoked task kind to `log` on every invocation
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping invocations observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(log) = &self.log {
            log.lock().unwrap().push(ctx.task.to_string());
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        let delay = match self.script {
            Script::Hang => Duration::from_secs(3600),
            _ => self.delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.script {
            Script::Succeed | Script::Hang => Ok(json!({
                "task": self.name,
                "attempt": ctx.attempt,
                "upstream": input.get("upstream").cloned().unwrap_or(Value::Null),
            })),
            Script::FailTransient => Err(CapabilityError::transient(format!(
                "{} unavailable",
                self.name
            ))),
            Script::FailFatal => Err(CapabilityError::fatal(format!("{} rejected input", self.name))),
            Script::FailTimes(n) if call <= n => Err(CapabilityError::transient(format!(
                "{} flaked on call {call}",
                self.name
            ))),
            Script::FailTimes(_) => Ok(json!({ "task": self.name, "attempt": ctx.attempt })),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
