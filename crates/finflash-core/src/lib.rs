//! Core data model for the FinFlash orchestration engine
//!
//! This crate defines the types shared by every other crate in the workspace:
//! task kinds and their descriptors, run requests, result envelopes, the
//! aggregated report, and the [`Capability`] trait through which the engine
//! reaches the opaque collection and analysis services.

pub mod capability;
pub mod context;
pub mod envelope;
pub mod error;
pub mod kind;
pub mod report;
pub mod request;
pub mod state;

pub use capability::{Capability, CapabilityError};
pub use context::TaskContext;
pub use envelope::{ErrorKind, Outcome, ResultEnvelope};
pub use error::{Error, Result};
pub use kind::{Shape, TaskDescriptor, TaskKind};
pub use report::AggregatedReport;
pub use request::{ExecutionMode, Payload, RunRequest};
pub use state::{RunStatus, TaskState};
