//! Uniform per-task result envelopes

use crate::kind::TaskKind;
use crate::state::TaskState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Failure categories a task envelope can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// An attempt exceeded its wall-clock timeout
    #[serde(rename = "AgentTimeoutError")]
    AgentTimeout,
    /// The capability failed, or every attempt was exhausted
    #[serde(rename = "AgentExecutionError")]
    AgentExecution,
    /// No rate-limit permit became available within the bounded wait
    RateLimitExceeded,
    /// A prerequisite task did not succeed, so this one was never attempted
    DependencyUnmet,
    /// The run deadline passed before this task was started
    RunTimeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AgentTimeout => "AgentTimeoutError",
            Self::AgentExecution => "AgentExecutionError",
            Self::RateLimitExceeded => "RateLimitExceeded",
            Self::DependencyUnmet => "DependencyUnmet",
            Self::RunTimeout => "RunTimeout",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        value: Value,
        /// Capability invocations made (zero for a cache hit)
        attempts: u32,
        #[serde(default)]
        cached: bool,
    },
    Failure {
        error: ErrorKind,
        message: String,
        attempts: u32,
        /// Kind of the last failed attempt when retries were exhausted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<ErrorKind>,
    },
}

/// The result of one task in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub kind: TaskKind,
    pub outcome: Outcome,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ResultEnvelope {
    /// Successful capability result
    pub fn success(kind: TaskKind, value: Value, attempts: u32, elapsed: Duration) -> Self {
        Self {
            kind,
            outcome: Outcome::Success {
                value,
                attempts,
                cached: false,
            },
            elapsed_ms: millis(elapsed),
        }
    }

    /// Result served from the shared cache
    pub fn cached(kind: TaskKind, value: Value) -> Self {
        Self {
            kind,
            outcome: Outcome::Success {
                value,
                attempts: 0,
                cached: true,
            },
            elapsed_ms: 0,
        }
    }

    /// Failed task
    pub fn failure(
        kind: TaskKind,
        error: ErrorKind,
        message: impl Into<String>,
        attempts: u32,
        cause: Option<ErrorKind>,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind,
            outcome: Outcome::Failure {
                error,
                message: message.into(),
                attempts,
                cause,
            },
            elapsed_ms: millis(elapsed),
        }
    }

    /// Synthetic envelope for a task whose prerequisites did not succeed
    pub fn dependency_unmet(kind: TaskKind, unmet: &[TaskKind]) -> Self {
        let names: Vec<&str> = unmet.iter().map(TaskKind::as_str).collect();
        Self::failure(
            kind,
            ErrorKind::DependencyUnmet,
            format!("dependency did not succeed: {}", names.join(", ")),
            0,
            None,
            Duration::ZERO,
        )
    }

    /// Synthetic envelope for a task left unstarted at the run deadline
    pub fn run_timeout(kind: TaskKind) -> Self {
        Self::failure(
            kind,
            ErrorKind::RunTimeout,
            "run deadline exceeded before the task was started",
            0,
            None,
            Duration::ZERO,
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    /// The produced value, if the task succeeded
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success { value, .. } => Some(value),
            Outcome::Failure { .. } => None,
        }
    }

    /// The failure kind, if the task failed
    pub fn error(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(*error),
        }
    }

    pub fn attempts(&self) -> u32 {
        match &self.outcome {
            Outcome::Success { attempts, .. } | Outcome::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self.outcome, Outcome::Success { cached: true, .. })
    }

    /// The terminal task state this envelope moves its task into
    ///
    /// Tasks that were never attempted (unmet dependency, run deadline) are
    /// `Skipped`; every other failure is `Failed`.
    pub fn terminal_state(&self) -> TaskState {
        match self.error() {
            None => TaskState::Succeeded,
            Some(ErrorKind::DependencyUnmet | ErrorKind::RunTimeout) => TaskState::Skipped,
            Some(_) => TaskState::Failed,
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
