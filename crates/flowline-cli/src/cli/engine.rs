//! Engine wiring shared by the `validate` and `run` commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use flowline_core::llm::box_provider::BoxCompletionProvider;
use flowline_core::repository::workflow::{DiscardExecutionLog, ExecutionLog};
use flowline_core::workflow::definition::load_definition_file;
use flowline_core::workflow::engine::WorkflowEngine;
use flowline_core::workflow::handlers::{register_builtins, BuiltinServices};
use flowline_core::workflow::registry::ExecutorRegistry;
use flowline_infra::config::{completion_api_key, load_engine_config};
use flowline_infra::llm::HttpCompletionProvider;
use flowline_infra::metrics::TracingMetricsSink;
use flowline_infra::validation::JsonSchemaValidator;
use flowline_infra::workflow::{FileWorkflowRepository, JsonlExecutionLog};
use flowline_types::config::EngineConfig;
use flowline_types::error::ExecutionLogError;
use flowline_types::run::RunResult;
use flowline_types::workflow::WorkflowDefinition;

pub type CliEngine = WorkflowEngine<FileWorkflowRepository, RunLog>;

/// Where the CLI persists run results.
pub enum RunLog {
    Jsonl(JsonlExecutionLog),
    Discard(DiscardExecutionLog),
}

impl ExecutionLog for RunLog {
    async fn persist(&self, result: &RunResult) -> Result<(), ExecutionLogError> {
        match self {
            RunLog::Jsonl(log) => log.persist(result).await,
            RunLog::Discard(log) => log.persist(result).await,
        }
    }
}

/// Parse a workflow file with a readable error.
pub fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    load_definition_file(file).with_context(|| format!("failed to load workflow {}", file.display()))
}

/// Load config from `path`, or use defaults when no path was given.
pub async fn load_config(path: Option<&Path>) -> EngineConfig {
    match path {
        Some(path) => load_engine_config(path).await,
        None => EngineConfig::default(),
    }
}

/// Registry with every built-in step type wired to real collaborators.
pub fn build_registry(config: &EngineConfig) -> Result<ExecutorRegistry> {
    let api_key = completion_api_key(config);
    if api_key.is_none() {
        tracing::debug!(
            env = config.completion.api_key_env.as_str(),
            "no completion API key set, AI steps will call the endpoint unauthenticated"
        );
    }
    let provider = HttpCompletionProvider::new(&config.completion, api_key)
        .context("failed to create completion provider")?;

    let mut registry = ExecutorRegistry::new();
    register_builtins(
        &mut registry,
        BuiltinServices {
            completion: Arc::new(BoxCompletionProvider::new(provider)),
            schema_validator: Arc::new(JsonSchemaValidator::new()),
            default_model: config.completion.default_model.clone(),
        },
    );
    Ok(registry)
}

/// Engine rooted at the workflow file's directory.
pub fn build_engine(file: &Path, config: EngineConfig, log: Option<&Path>) -> Result<CliEngine> {
    let root = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let run_log = match log {
        Some(path) => RunLog::Jsonl(JsonlExecutionLog::new(path)),
        None => RunLog::Discard(DiscardExecutionLog),
    };
    let registry = build_registry(&config)?;

    Ok(WorkflowEngine::new(FileWorkflowRepository::new(root), run_log, registry, config)
        .with_metrics_sink(Arc::new(TracingMetricsSink)))
}

#[cfg(test)]
mod tests {
    use flowline_types::run::RunStatus;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;

    const WORKFLOW: &str = r#"
id: greet
name: Greet
nodes:
  - id: collect
    type: input
    config:
      fields: [name]
  - id: shout
    type: transform
    depends_on: [collect]
    config:
      expression: "input.name|upper"
"#;

    #[test]
    fn registry_has_builtin_types() {
        let registry = build_registry(&EngineConfig::default()).unwrap();
        for tag in ["ai", "conditional", "input", "output", "transform", "validation"] {
            assert!(registry.contains(tag), "missing {tag}");
        }
    }

    #[tokio::test]
    async fn runs_file_and_appends_to_log() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("greet.yaml");
        std::fs::write(&file, WORKFLOW).unwrap();
        let log_path = tmp.path().join("runs.jsonl");

        let def = load_definition(&file).unwrap();
        let engine = build_engine(&file, EngineConfig::default(), Some(&log_path)).unwrap();
        let result = engine
            .run_with_id(Uuid::now_v7(), &def, json!({ "name": "ada" }))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(
            result.step("shout").and_then(|r| r.output.clone()),
            Some(json!("ADA"))
        );

        let persisted = JsonlExecutionLog::new(&log_path).read_all().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].run_id, result.run_id);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_definition(Path::new("/nonexistent/wf.yaml")).unwrap_err();
        assert!(err.to_string().contains("wf.yaml"));
    }
}
