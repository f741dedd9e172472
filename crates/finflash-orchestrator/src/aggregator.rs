//! Result aggregation and run-level status

use crate::run::RunInstance;
use chrono::Utc;
use finflash_core::{AggregatedReport, Error, Result, ResultEnvelope, RunStatus, TaskKind, TaskState};
use std::collections::{BTreeMap, BTreeSet};

/// Groups of task kinds that must each produce a success for a run with
/// failures to still count as a partial failure
///
/// A group with no member in the run is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinimumViableSet {
    groups: Vec<BTreeSet<TaskKind>>,
}

impl MinimumViableSet {
    pub fn new(groups: Vec<BTreeSet<TaskKind>>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[BTreeSet<TaskKind>] {
        &self.groups
    }

    pub fn is_satisfied_by(&self, envelopes: &BTreeMap<TaskKind, ResultEnvelope>) -> bool {
        self.groups.iter().all(|group| {
            let mut present = group.iter().filter_map(|kind| envelopes.get(kind)).peekable();
            present.peek().is_none() || present.any(ResultEnvelope::is_success)
        })
    }
}

/// Folds task envelopes into a run and produces its report
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    minimum_viable: MinimumViableSet,
}

impl ResultAggregator {
    pub fn new(minimum_viable: MinimumViableSet) -> Self {
        Self { minimum_viable }
    }

    pub fn minimum_viable(&self) -> &MinimumViableSet {
        &self.minimum_viable
    }

    /// Record an envelope against its task, returning the task's terminal state
    pub fn fold(&self, run: &mut RunInstance, envelope: ResultEnvelope) -> Result<TaskState> {
        run.record(envelope)
    }

    /// Build the report of a run whose tasks are all terminal
    pub fn finalize(&self, run: &RunInstance) -> Result<AggregatedReport> {
        let pending = run.unfinished();
        if !pending.is_empty() {
            return Err(Error::IncompleteRun { pending });
        }

        let envelopes = run.envelopes().clone();
        let status = self.status_of(&envelopes);

        Ok(AggregatedReport {
            run_id: run.run_id(),
            source: run.source().to_string(),
            mode: run.mode(),
            payload_shape: run.payload_shape(),
            status,
            envelopes,
            started_at: run.started_at(),
            finished_at: Utc::now(),
        })
    }

    /// Run-level status of a complete set of envelopes
    pub fn status_of(&self, envelopes: &BTreeMap<TaskKind, ResultEnvelope>) -> RunStatus {
        let successes = envelopes.values().filter(|e| e.is_success()).count();

        if successes == envelopes.len() {
            RunStatus::Completed
        } else if successes > 0 && self.minimum_viable.is_satisfied_by(envelopes) {
            RunStatus::PartialFailure
        } else {
            RunStatus::Failed
        }
    }
}
