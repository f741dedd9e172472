//! Report persistence collaborators

use async_trait::async_trait;
use finflash_core::{AggregatedReport, Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persists aggregated reports
///
/// The orchestrator calls `save` exactly once per finished run.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, report: &AggregatedReport) -> Result<()>;

    async fn load(&self, run_id: Uuid) -> Result<AggregatedReport>;
}

/// Reports kept in process memory
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: RwLock<HashMap<Uuid, AggregatedReport>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save(&self, report: &AggregatedReport) -> Result<()> {
        self.reports
            .write()
            .await
            .insert(report.run_id, report.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<AggregatedReport> {
        self.reports
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(Error::ReportNotFound(run_id))
    }
}

/// One pretty-printed `<run_id>.json` file per report
pub struct JsonFileReportStore {
    dir: PathBuf,
}

impl JsonFileReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl ReportStore for JsonFileReportStore {
    async fn save(&self, report: &AggregatedReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(report)?;
        let path = self.path_for(report.run_id);
        tokio::fs::write(&path, body).await?;
        tracing::debug!(run_id = %report.run_id, path = %path.display(), "Report saved");
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<AggregatedReport> {
        let body = match tokio::fs::read(self.path_for(run_id)).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ReportNotFound(run_id));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use finflash_core::{ExecutionMode, ResultEnvelope, RunStatus, Shape, TaskKind};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn report() -> AggregatedReport {
        let mut envelopes = BTreeMap::new();
        envelopes.insert(
            TaskKind::COLLECT_TEXT,
            ResultEnvelope::success(
                TaskKind::COLLECT_TEXT,
                json!({"content": "X reports record earnings"}),
                1,
                Duration::from_millis(12),
            ),
        );

        AggregatedReport {
            run_id: Uuid::new_v4(),
            source: "newswire".to_string(),
            mode: ExecutionMode::Sequential,
            payload_shape: Shape::Text,
            status: RunStatus::Completed,
            envelopes,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryReportStore::new();
        let report = report();

        assert!(matches!(
            store.load(report.run_id).await,
            Err(Error::ReportNotFound(_))
        ));
        store.save(&report).await.unwrap();
        assert_eq!(store.load(report.run_id).await.unwrap(), report);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileReportStore::new(dir.path().join("reports"));
        let report = report();

        store.save(&report).await.unwrap();
        assert!(
            dir.path()
                .join("reports")
                .join(format!("{}.json", report.run_id))
                .exists()
        );

        let loaded = store.load(report.run_id).await.unwrap();
        assert_eq!(loaded, report);
        assert!(matches!(
            store.load(Uuid::new_v4()).await,
            Err(Error::ReportNotFound(_))
        ));
    }
}
