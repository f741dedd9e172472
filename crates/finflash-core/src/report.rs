//! Aggregated run report

use crate::envelope::ResultEnvelope;
use crate::kind::{Shape, TaskKind};
use crate::request::ExecutionMode;
use crate::state::{RunStatus, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Terminal output of one run: every task's envelope plus a run-level status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReport {
    pub run_id: Uuid,
    pub source: String,
    pub mode: ExecutionMode,
    pub payload_shape: Shape,
    pub status: RunStatus,
    pub envelopes: BTreeMap<TaskKind, ResultEnvelope>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AggregatedReport {
    /// Envelope recorded for a task kind
    pub fn envelope(&self, kind: &TaskKind) -> Option<&ResultEnvelope> {
        self.envelopes.get(kind)
    }

    /// Final state of a task kind in this run
    pub fn state_of(&self, kind: &TaskKind) -> Option<TaskState> {
        self.envelopes.get(kind).map(ResultEnvelope::terminal_state)
    }

    pub fn task_count(&self) -> usize {
        self.envelopes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskState::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskState::Skipped)
    }

    /// Number of tasks answered from the shared cache
    pub fn cache_hits(&self) -> usize {
        self.envelopes.values().filter(|e| e.is_cached()).count()
    }

    /// Wall-clock duration of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    fn count(&self, state: TaskState) -> usize {
        self.envelopes
            .values()
            .filter(|e| e.terminal_state() == state)
            .count()
    }
}
