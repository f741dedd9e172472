//! Configuration file and registry wiring

use anyhow::Context;
use finflash_capabilities::{EndpointConfig, FnCapability, HttpCapability, PassthroughCapability};
use finflash_core::{Capability, CapabilityError, TaskKind};
use finflash_orchestrator::{OrchestratorConfig, TaskRegistry, pipeline};
use finflash_utils::{AppConfig, load_json_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Contents of the `--config` file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub app: AppConfig,
    pub orchestrator: OrchestratorConfig,
    /// Task kind -> analysis service
    pub capabilities: BTreeMap<TaskKind, EndpointConfig>,
}

impl CliConfig {
    /// Read the file if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config: Self = match path {
            Some(path) => load_json_file(path)?,
            None => Self::default(),
        };

        Ok(Self {
            app: config.app.with_env_overrides(),
            orchestrator: config.orchestrator.with_env_overrides(),
            capabilities: config.capabilities,
        })
    }
}

/// Pick the capability serving `kind`
///
/// Dry runs never leave the process. Otherwise a configured endpoint wins,
/// `collect-text` falls back to passthrough, and every other kind fails
/// fatally so the report names what is missing.
fn capability_for(
    kind: &TaskKind,
    endpoints: &BTreeMap<TaskKind, EndpointConfig>,
    dry_run: bool,
) -> anyhow::Result<Arc<dyn Capability>> {
    if dry_run {
        return Ok(Arc::new(PassthroughCapability::new(kind.as_str())));
    }

    if let Some(endpoint) = endpoints.get(kind) {
        debug!(task = %kind, url = %endpoint.url, "Using HTTP capability");
        let capability = HttpCapability::from_config(kind.as_str(), endpoint)
            .with_context(|| format!("failed to build HTTP client for {kind}"))?;
        return Ok(Arc::new(capability));
    }

    if *kind == TaskKind::COLLECT_TEXT {
        return Ok(Arc::new(PassthroughCapability::new(kind.as_str())));
    }

    Ok(Arc::new(FnCapability::sync(kind.as_str(), |_, ctx| {
        Err(CapabilityError::fatal(format!(
            "no endpoint configured for {}",
            ctx.task
        )))
    })))
}

/// Register the standard pipeline with capabilities chosen from the config
pub fn build_registry(
    endpoints: &BTreeMap<TaskKind, EndpointConfig>,
    dry_run: bool,
) -> anyhow::Result<TaskRegistry> {
    let descriptors = pipeline::standard_descriptors();

    for kind in endpoints.keys() {
        if !descriptors.iter().any(|d| &d.kind == kind) {
            warn!(task = %kind, "Ignoring endpoint for unknown task kind");
        }
    }

    let mut builder = TaskRegistry::builder();
    for descriptor in descriptors {
        let capability = capability_for(&descriptor.kind, endpoints, dry_run)?;
        builder.register(descriptor, capability)?;
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use finflash_core::TaskContext;
    use serde_json::json;

    fn ctx(kind: TaskKind) -> TaskContext {
        TaskContext::new(Default::default(), kind, "cli")
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finflash.json");
        std::fs::write(
            &path,
            r#"{
                "orchestrator": {"max_concurrent_tasks": 3},
                "capabilities": {"analyze-risk": {"url": "http://localhost:9000/risk"}}
            }"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_tasks, 3);
        assert_eq!(config.app.app_name, "finflash");
        assert_eq!(
            config.capabilities[&TaskKind::ANALYZE_RISK].url,
            "http://localhost:9000/risk"
        );
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(CliConfig::load(Some(Path::new("/nonexistent/finflash.json"))).is_err());
    }

    #[test]
    fn test_registry_has_standard_pipeline() {
        let registry = build_registry(&BTreeMap::new(), true).unwrap();
        assert_eq!(registry.len(), 7);
        assert!(registry.contains(&TaskKind::SYNTHESIZE_SUMMARY));
    }

    #[tokio::test]
    async fn test_unconfigured_analyzer_fails_fatally() {
        let registry = build_registry(&BTreeMap::new(), false).unwrap();

        let text = registry.capability(&TaskKind::COLLECT_TEXT).unwrap();
        let doc = text
            .invoke(
                json!({"payload": {"kind": "text", "content": "rates hold"}}),
                &ctx(TaskKind::COLLECT_TEXT),
            )
            .await
            .unwrap();
        assert_eq!(doc["content"], "rates hold");

        let risk = registry.capability(&TaskKind::ANALYZE_RISK).unwrap();
        let err = risk
            .invoke(json!({}), &ctx(TaskKind::ANALYZE_RISK))
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.message, "no endpoint configured for analyze-risk");
    }

    #[test]
    fn test_configured_endpoint_uses_http() {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            TaskKind::ANALYZE_RISK,
            EndpointConfig::new("http://localhost:9000/risk"),
        );

        let registry = build_registry(&endpoints, false).unwrap();
        let risk = registry.capability(&TaskKind::ANALYZE_RISK).unwrap();
        assert_eq!(risk.name(), "analyze-risk");
    }
}
