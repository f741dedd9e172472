//! Counters over finished runs

use finflash_core::{AggregatedReport, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free run counters shared by every run of an orchestrator
#[derive(Debug, Default)]
pub struct RunStats {
    total_runs: AtomicU64,
    completed: AtomicU64,
    partial_failures: AtomicU64,
    failed: AtomicU64,
    tasks_executed: AtomicU64,
    cache_hits: AtomicU64,
}

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_runs: u64,
    pub completed: u64,
    pub partial_failures: u64,
    pub failed: u64,
    pub tasks_executed: u64,
    pub cache_hits: u64,
    /// Share of runs that ended `Completed`, 0.0 with no runs
    pub success_rate: f64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, report: &AggregatedReport) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);

        let counter = match report.status {
            RunStatus::Completed => &self.completed,
            RunStatus::PartialFailure => &self.partial_failures,
            RunStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.tasks_executed
            .fetch_add(report.task_count() as u64, Ordering::Relaxed);
        self.cache_hits
            .fetch_add(report.cache_hits() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_runs = self.total_runs.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);

        StatsSnapshot {
            total_runs,
            completed,
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            success_rate: if total_runs == 0 {
                0.0
            } else {
                completed as f64 / total_runs as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use finflash_core::{ExecutionMode, ResultEnvelope, Shape, TaskKind};
    use serde_json::json;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn report(status: RunStatus, cached: bool) -> AggregatedReport {
        let envelope = if cached {
            ResultEnvelope::cached(TaskKind::COLLECT_TEXT, json!({}))
        } else {
            ResultEnvelope::run_timeout(TaskKind::COLLECT_TEXT)
        };
        let mut envelopes = BTreeMap::new();
        envelopes.insert(TaskKind::COLLECT_TEXT, envelope);

        AggregatedReport {
            run_id: Uuid::new_v4(),
            source: "test".to_string(),
            mode: ExecutionMode::Parallel,
            payload_shape: Shape::Text,
            status,
            envelopes,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = RunStats::new().snapshot();
        assert_eq!(snapshot.total_runs, 0);
        assert!(snapshot.success_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_counts_by_status() {
        let stats = RunStats::new();
        stats.record(&report(RunStatus::Completed, true));
        stats.record(&report(RunStatus::Completed, false));
        stats.record(&report(RunStatus::PartialFailure, false));
        stats.record(&report(RunStatus::Failed, false));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_runs, 4);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.partial_failures, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.tasks_executed, 4);
        assert_eq!(snapshot.cache_hits, 1);
        assert!((snapshot.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
