//! Error types for finflash-core

use crate::kind::TaskKind;
use crate::state::TaskState;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for finflash crates
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-level errors
///
/// Task-level failures never show up here: they are carried inside result
/// envelopes. These variants are configuration faults, invariant violations
/// and collaborator failures.
#[derive(Error, Debug)]
pub enum Error {
    /// A task kind is not registered
    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(TaskKind),

    /// A task kind was registered twice
    #[error("Task kind already registered: {0}")]
    DuplicateTaskKind(TaskKind),

    /// The dependency relation contains a cycle
    #[error("Cyclic dependency: {}", join_kinds(.cycle, " -> "))]
    CyclicDependency { cycle: Vec<TaskKind> },

    /// Finalize was called while tasks were still pending or running
    #[error("Run finalized with non-terminal tasks: {}", join_kinds(.pending, ", "))]
    IncompleteRun { pending: Vec<TaskKind> },

    /// A task state change that the run lifecycle does not allow
    #[error("Invalid transition for {kind}: {from} -> {to}")]
    InvalidTransition {
        kind: TaskKind,
        from: TaskState,
        to: TaskState,
    },

    /// No stored report for the given run
    #[error("Report not found: {0}")]
    ReportNotFound(Uuid),

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is raised while building or planning, before any task runs
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTaskKind(_)
                | Self::DuplicateTaskKind(_)
                | Self::CyclicDependency { .. }
                | Self::Config(_)
        )
    }
}

fn join_kinds(kinds: &[TaskKind], separator: &str) -> String {
    kinds
        .iter()
        .map(TaskKind::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}
