//! `taskmesh.toml` loading and registry assembly.

use serde::Deserialize;
use std::path::Path;
use taskmesh_agents::{register_builtins, BuiltinKind};
use taskmesh_core::{AgentDescriptor, TaskDefinition, TaskmeshError, TaskmeshResult};
use taskmesh_orchestrator::{CapabilityRegistry, SchedulerConfig};
use tracing::info;

/// Top-level CLI configuration.
///
/// With no `[[agents]]` entries every built-in agent is registered under its
/// default descriptor.
#[derive(Debug, Default, Deserialize)]
pub struct TaskmeshConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

/// One `[[agents]]` table: a descriptor plus the implementation to bind it to.
#[derive(Debug, Deserialize)]
pub struct AgentEntry {
    pub kind: BuiltinKind,
    #[serde(flatten)]
    pub descriptor: AgentDescriptor,
}

impl TaskmeshConfig {
    pub fn from_toml(text: &str) -> TaskmeshResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| TaskmeshError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> TaskmeshResult<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            TaskmeshError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> TaskmeshResult<()> {
        if self.scheduler.max_in_flight == 0 {
            return Err(TaskmeshError::Config(
                "scheduler.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.scheduler.default_timeout_ms == 0 {
            return Err(TaskmeshError::Config(
                "scheduler.default_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a registry from the configured agents.
    pub fn build_registry(&self) -> TaskmeshResult<CapabilityRegistry> {
        let registry = CapabilityRegistry::new();
        if self.agents.is_empty() {
            register_builtins(&registry)?;
            info!(count = registry.len(), "Built-in agents registered");
            return Ok(registry);
        }
        for entry in &self.agents {
            registry.register(entry.descriptor.clone(), entry.kind.build())?;
        }
        info!(count = registry.len(), "Configured agents registered");
        Ok(registry)
    }
}

/// Read a JSON plan: an array of task definitions.
pub async fn load_plan(path: &Path) -> TaskmeshResult<Vec<TaskDefinition>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use taskmesh_core::Backoff;

    const SAMPLE: &str = r#"
[scheduler]
max_in_flight = 4

[[agents]]
kind = "research"
id = "web-research"
capabilities = ["retrieve_documents"]
priority = 70
concurrency = 2
timeout_ms = 5000
tags = ["research"]

[agents.retry_policy]
max_retries = 1
backoff = "fixed"
base_delay_ms = 250

[agents.input_schema]
type = "object"
required = ["query"]

[[agents]]
kind = "summarizer"
id = "summ"
capabilities = ["summarize_text"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = TaskmeshConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.scheduler.max_in_flight, 4);
        assert_eq!(config.scheduler.default_timeout_ms, 30_000);
        assert_eq!(config.agents.len(), 2);

        let research = &config.agents[0];
        assert_eq!(research.kind, BuiltinKind::Research);
        assert_eq!(research.descriptor.id, "web-research");
        assert_eq!(research.descriptor.priority, 70);
        assert_eq!(research.descriptor.concurrency, 2);
        assert_eq!(research.descriptor.timeout_ms, Some(5000));
        assert_eq!(research.descriptor.retry_policy.max_retries, 1);
        assert_eq!(research.descriptor.retry_policy.backoff, Backoff::Fixed);
        assert_eq!(research.descriptor.retry_policy.max_delay_ms, 30_000);
        assert_eq!(
            research.descriptor.input_schema.as_ref().unwrap()["required"][0],
            "query"
        );

        let summ = &config.agents[1];
        assert_eq!(summ.descriptor.concurrency, 1);
        assert_eq!(summ.descriptor.priority, 50);
        assert!(summ.descriptor.input_schema.is_none());
    }

    #[test]
    fn test_build_registry_from_entries() {
        let registry = TaskmeshConfig::from_toml(SAMPLE)
            .unwrap()
            .build_registry()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.find_candidates("retrieve_documents", &serde_json::json!({"query": "q"})),
            vec!["web-research"]
        );
        assert!(registry
            .find_candidates("retrieve_documents", &serde_json::json!({}))
            .is_empty());
    }

    #[test]
    fn test_empty_config_uses_builtins() {
        let config = TaskmeshConfig::from_toml("").unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), BuiltinKind::ALL.len());
    }

    #[test]
    fn test_invalid_configs() {
        let zero = "[scheduler]\nmax_in_flight = 0\n";
        assert!(matches!(
            TaskmeshConfig::from_toml(zero),
            Err(TaskmeshError::Config(_))
        ));

        let unknown_kind = "[[agents]]\nkind = \"oracle\"\nid = \"x\"\ncapabilities = [\"a\"]\n";
        assert!(TaskmeshConfig::from_toml(unknown_kind).is_err());

        let duplicate = r#"
[[agents]]
kind = "echo"
id = "same"
capabilities = ["echo"]

[[agents]]
kind = "memory"
id = "same"
capabilities = ["store_memory"]
"#;
        let config = TaskmeshConfig::from_toml(duplicate).unwrap();
        assert!(matches!(
            config.build_registry(),
            Err(TaskmeshError::DuplicateAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("taskmesh.toml");
        std::fs::File::create(&config_path)
            .unwrap()
            .write_all(SAMPLE.as_bytes())
            .unwrap();
        let config = TaskmeshConfig::load(&config_path).await.unwrap();
        assert_eq!(config.agents.len(), 2);

        let plan_path = dir.path().join("plan.json");
        std::fs::write(
            &plan_path,
            r#"[{"id": "a", "task_type": "echo"}, {"id": "b", "task_type": "echo", "dependencies": ["a"], "priority": 3}]"#,
        )
        .unwrap();
        let plan = load_plan(&plan_path).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].dependencies, vec!["a".to_string()]);
        assert_eq!(plan[1].priority, 3);

        let missing = TaskmeshConfig::load(&dir.path().join("nope.toml")).await;
        assert!(matches!(missing, Err(TaskmeshError::Config(_))));
    }
}
