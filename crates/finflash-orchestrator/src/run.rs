//! Per-run mutable state

use chrono::{DateTime, Utc};
use finflash_core::{
    Error, ExecutionMode, Result, ResultEnvelope, RunRequest, Shape, TaskKind, TaskState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Orchestrator lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Created,
    Planning,
    Executing,
    Aggregating,
    Completed,
    Failed,
}

impl RunPhase {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Planning)
                | (Self::Planning, Self::Executing | Self::Failed)
                | (Self::Executing, Self::Aggregating)
                | (Self::Aggregating, Self::Completed | Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Task states and envelopes of one run
///
/// Owned exclusively by the run that created it.
#[derive(Debug)]
pub struct RunInstance {
    run_id: Uuid,
    source: String,
    mode: ExecutionMode,
    payload_shape: Shape,
    phase: RunPhase,
    states: BTreeMap<TaskKind, TaskState>,
    envelopes: BTreeMap<TaskKind, ResultEnvelope>,
    started_at: DateTime<Utc>,
}

impl RunInstance {
    pub fn new(request: &RunRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source: request.source.clone(),
            mode: request.mode,
            payload_shape: request.payload.shape(),
            phase: RunPhase::Created,
            states: BTreeMap::new(),
            envelopes: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn payload_shape(&self) -> Shape {
        self.payload_shape
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to the next lifecycle phase
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(Error::Config(format!(
                "run {} cannot move from {} to {next}",
                self.run_id, self.phase
            )));
        }
        tracing::debug!(run_id = %self.run_id, from = %self.phase, to = %next, "Run phase changed");
        self.phase = next;
        Ok(())
    }

    /// Add tasks in the `Pending` state
    pub fn add_tasks<'a>(&mut self, kinds: impl IntoIterator<Item = &'a TaskKind>) {
        for kind in kinds {
            self.states.entry(kind.clone()).or_insert(TaskState::Pending);
        }
    }

    /// Mark a pending task as dispatched
    pub fn mark_running(&mut self, kind: &TaskKind) -> Result<()> {
        let state = self
            .states
            .get_mut(kind)
            .ok_or_else(|| Error::UnknownTaskKind(kind.clone()))?;

        if *state != TaskState::Pending {
            return Err(Error::InvalidTransition {
                kind: kind.clone(),
                from: *state,
                to: TaskState::Running,
            });
        }
        *state = TaskState::Running;
        Ok(())
    }

    /// Record a terminal envelope
    ///
    /// Fails if the kind is not part of the run or already terminal.
    pub(crate) fn record(&mut self, envelope: ResultEnvelope) -> Result<TaskState> {
        let kind = envelope.kind.clone();
        let next = envelope.terminal_state();
        let state = self
            .states
            .get_mut(&kind)
            .ok_or_else(|| Error::UnknownTaskKind(kind.clone()))?;

        if state.is_terminal() {
            return Err(Error::InvalidTransition {
                kind,
                from: *state,
                to: next,
            });
        }

        *state = next;
        self.envelopes.insert(kind, envelope);
        Ok(next)
    }

    pub fn state(&self, kind: &TaskKind) -> Option<TaskState> {
        self.states.get(kind).copied()
    }

    pub fn states(&self) -> &BTreeMap<TaskKind, TaskState> {
        &self.states
    }

    pub fn envelope(&self, kind: &TaskKind) -> Option<&ResultEnvelope> {
        self.envelopes.get(kind)
    }

    pub fn envelopes(&self) -> &BTreeMap<TaskKind, ResultEnvelope> {
        &self.envelopes
    }

    /// Whether the task finished with a success envelope
    pub fn succeeded(&self, kind: &TaskKind) -> bool {
        self.state(kind) == Some(TaskState::Succeeded)
    }

    /// Tasks still pending or running
    pub fn unfinished(&self) -> Vec<TaskKind> {
        self.states
            .iter()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    /// Tasks not dispatched yet
    pub fn pending(&self) -> Vec<TaskKind> {
        self.states
            .iter()
            .filter(|(_, state)| **state == TaskState::Pending)
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.states.len()
    }
}
