//! Task orchestration engine for FinFlash
//!
//! This crate decides which analysis tasks run for a request, in which order
//! and with how much parallelism. It also bounds their failures and merges
//! their results into one report.
//!
//! # Example
//!
//! ```no_run
//! use finflash_core::{ExecutionMode, RunRequest};
//! use finflash_orchestrator::{Orchestrator, OrchestratorConfig, TaskRegistry, pipeline};
//! # use std::sync::Arc;
//! # async fn example(capability: Arc<dyn finflash_core::Capability>) -> finflash_core::Result<()> {
//! let mut builder = TaskRegistry::builder();
//! for descriptor in pipeline::standard_descriptors() {
//!     builder.register(descriptor, Arc::clone(&capability))?;
//! }
//!
//! let orchestrator = Orchestrator::new(builder.build()?, OrchestratorConfig::default())?;
//! let report = orchestrator
//!     .submit(RunRequest::text("X reports record earnings").with_mode(ExecutionMode::Parallel))
//!     .await?;
//! println!("{}", report.status);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod guard;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod run;
pub mod runner;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export for convenience
pub use aggregator::{MinimumViableSet, ResultAggregator};
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder, RateLimitRule, RetrySettings};
pub use guard::{
    CacheBackend, GovernorRateLimiter, RateLimitBackend, SharedResourceGuard, TimedResultCache,
    fingerprint,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunEvent};
pub use planner::{ExecutionPlan, ExecutionPlanner, Wave};
pub use registry::{TaskRegistry, TaskRegistryBuilder};
pub use retry::RetryPolicy;
pub use run::{RunInstance, RunPhase};
pub use runner::TaskRunner;
pub use stats::{RunStats, StatsSnapshot};
pub use store::{InMemoryReportStore, JsonFileReportStore, ReportStore};
