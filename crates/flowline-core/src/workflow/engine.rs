//! Workflow engine: pre-flight, planning, dispatch, and persistence.
//!
//! `WorkflowEngine` ties the pieces together for one run:
//!
//! 1. Fetch the frozen definition (or take one directly).
//! 2. Structural validation, then planning. Any configuration issue or cycle
//!    aborts the run before a single step is dispatched.
//! 3. Build every executor through the registry and run its pre-flight check.
//! 4. Hand the plan to a fresh `BatchScheduler` with a fresh
//!    `ExecutionContext`, bounded by the run timeout.
//! 5. Persist the `RunResult` through the `ExecutionLog`.
//!
//! In-flight runs can be cancelled by id; plans are cached by definition
//! content hash, up to a fixed number of entries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flowline_types::config::{EngineConfig, ExecutionConfig};
use flowline_types::error::{ExecutionLogError, RepositoryError};
use flowline_types::run::RunResult;
use flowline_types::workflow::{ExecutionPlan, StepId, WorkflowDefinition};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::{MetricsRecorder, MetricsSink, NoopMetricsSink};
use crate::repository::workflow::{ExecutionLog, WorkflowRepository};

use super::context::ExecutionContext;
use super::dag::{plan, successors, PlanError};
use super::definition::{content_hash, validate_structure, ConfigIssue};
use super::registry::{ExecutorRegistry, RegistryError};
use super::retry::{Jitter, RetryCoordinator, RetryPolicy};
use super::scheduler::{BatchScheduler, PreparedStep};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors that stop a run before or instead of producing a `RunResult`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pre-flight found problems; the run never started.
    #[error("configuration error: {}", format_issues(.0))]
    Configuration(Vec<ConfigIssue>),

    /// The graph contains a cycle; the run never started.
    #[error("workflow contains a cycle through: {}", format_nodes(.nodes))]
    Cycle { nodes: BTreeSet<StepId> },

    /// A step names a type tag nobody registered.
    #[error("step '{step_id}' has unknown step type '{step_type}'")]
    UnknownStepType { step_id: StepId, step_type: String },

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("execution log error: {0}")]
    ExecutionLog(#[from] ExecutionLogError),
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_nodes(nodes: &BTreeSet<StepId>) -> String {
    nodes.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Plans kept before an arbitrary cached entry is evicted.
pub const DEFAULT_PLAN_CACHE_CAPACITY: usize = 128;

/// Issues with engine-wide execution limits.
fn execution_config_issues(execution: &ExecutionConfig) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    if execution.step_timeout_secs == 0 {
        issues.push(ConfigIssue::workflow("execution.step_timeout_secs must be at least 1"));
    }
    if execution.run_timeout_secs == 0 {
        issues.push(ConfigIssue::workflow("execution.run_timeout_secs must be at least 1"));
    }
    issues
}

/// A definition that passed pre-flight.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub plan: Arc<ExecutionPlan>,
    pub steps: HashMap<StepId, PreparedStep>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs workflow definitions end to end.
pub struct WorkflowEngine<R: WorkflowRepository, L: ExecutionLog> {
    repository: R,
    execution_log: L,
    registry: ExecutorRegistry,
    config: EngineConfig,
    metrics_sink: Arc<dyn MetricsSink>,
    /// Plans keyed by definition content hash.
    plans: DashMap<String, Arc<ExecutionPlan>>,
    plan_cache_capacity: usize,
    /// Cancellation tokens for in-flight runs.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: WorkflowRepository, L: ExecutionLog> WorkflowEngine<R, L> {
    pub fn new(repository: R, execution_log: L, registry: ExecutorRegistry, config: EngineConfig) -> Self {
        Self {
            repository,
            execution_log,
            registry,
            config,
            metrics_sink: Arc::new(NoopMetricsSink),
            plans: DashMap::new(),
            plan_cache_capacity: DEFAULT_PLAN_CACHE_CAPACITY,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Forward run telemetry to `sink`.
    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    /// Bound the plan cache. Zero disables caching.
    pub fn with_plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Number of runs currently executing.
    pub fn active_runs(&self) -> usize {
        self.cancellation_tokens.len()
    }

    /// Plan a definition, reusing a cached plan for identical content.
    pub fn plan(&self, definition: &WorkflowDefinition) -> Result<Arc<ExecutionPlan>, EngineError> {
        let hash = content_hash(definition);
        if let Some(cached) = self.plans.get(&hash) {
            tracing::debug!(workflow_id = definition.id.as_str(), "using cached plan");
            return Ok(Arc::clone(cached.value()));
        }
        let computed = Arc::new(plan(definition)?);
        if self.plan_cache_capacity == 0 {
            return Ok(computed);
        }
        while self.plans.len() >= self.plan_cache_capacity {
            let victim = self.plans.iter().next().map(|entry| entry.key().clone());
            match victim {
                Some(key) => {
                    self.plans.remove(&key);
                }
                None => break,
            }
        }
        self.plans.insert(hash, Arc::clone(&computed));
        Ok(computed)
    }

    /// Validate a definition and prepare every step, with no side effects.
    pub fn preflight(&self, definition: &WorkflowDefinition) -> Result<Preflight, EngineError> {
        let mut issues = execution_config_issues(&self.config.execution);
        issues.extend(validate_structure(definition));
        if !issues.is_empty() {
            return Err(EngineError::Configuration(issues));
        }

        let plan = self.plan(definition)?;
        if plan.has_cycles {
            let nodes = plan.cycle_nodes.clone().unwrap_or_default();
            tracing::warn!(workflow_id = definition.id.as_str(), cycle = ?nodes, "cycle detected");
            return Err(EngineError::Cycle { nodes });
        }

        let successors = successors(&plan);
        let no_successors = BTreeSet::new();
        let step_timeout = Duration::from_secs(self.config.execution.step_timeout_secs);
        let mut issues = Vec::new();
        let mut steps = HashMap::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            let executor = match self.registry.create(&node.type_tag, &node.config) {
                Ok(executor) => executor,
                Err(RegistryError::UnknownStepType(step_type)) => {
                    return Err(EngineError::UnknownStepType {
                        step_id: node.id.clone(),
                        step_type,
                    });
                }
                Err(e @ RegistryError::InvalidConfig { .. }) => {
                    issues.push(ConfigIssue::step(&node.id, e.to_string()));
                    continue;
                }
            };

            let step_successors = successors.get(&node.id).unwrap_or(&no_successors);
            if let Err(message) = executor.validate_config(step_successors) {
                issues.push(ConfigIssue::step(&node.id, message));
            }

            let policy_config = node.retry.as_ref().unwrap_or(&self.config.retry);
            let policy = match RetryPolicy::from_config(policy_config) {
                Ok(policy) => policy,
                Err(e) => {
                    issues.push(ConfigIssue::step(&node.id, e.to_string()));
                    continue;
                }
            };

            let attempt_timeout = node
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(step_timeout);

            steps.insert(
                node.id.clone(),
                PreparedStep {
                    type_tag: node.type_tag.clone(),
                    executor,
                    policy,
                    attempt_timeout,
                },
            );
        }

        if !issues.is_empty() {
            return Err(EngineError::Configuration(issues));
        }
        Ok(Preflight { plan, steps })
    }

    /// Fetch a definition from the repository and run it.
    pub async fn run(&self, workflow_id: &str, input: Value) -> Result<RunResult, EngineError> {
        let definition = self
            .repository
            .get_definition(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(workflow_id.to_string()))?;
        self.run_definition(&definition, input).await
    }

    /// Run a definition against `input`, producing exactly one `RunResult`.
    pub async fn run_definition(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> Result<RunResult, EngineError> {
        let run_id = Uuid::now_v7();
        self.run_with_id(run_id, definition, input).await
    }

    /// Like [`run_definition`](Self::run_definition) with a caller-chosen run
    /// id, so the run can be cancelled by id while it executes.
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> Result<RunResult, EngineError> {
        let Preflight { plan, steps } = self.preflight(definition)?;

        tracing::info!(
            run_id = %run_id,
            workflow_id = definition.id.as_str(),
            batches = plan.batch_count(),
            steps = plan.step_count(),
            "starting workflow run"
        );

        let cancel_token = CancellationToken::new();
        self.cancellation_tokens.insert(run_id, cancel_token.clone());

        let watchdog = self.spawn_run_timeout(run_id, cancel_token.clone());

        let ctx = Arc::new(ExecutionContext::new(
            run_id,
            definition,
            input,
            cancel_token,
        ));
        let metrics = MetricsRecorder::start(run_id, Arc::clone(&self.metrics_sink));
        let jitter = Arc::new(Jitter::from_seed(self.config.execution.jitter_seed));
        let coordinator = RetryCoordinator::new(jitter, metrics.clone());
        let scheduler = BatchScheduler::new(
            coordinator,
            metrics,
            self.config.execution.max_parallelism,
        );

        let result = scheduler.run(definition, &plan, &steps, ctx).await;

        watchdog.abort();
        self.cancellation_tokens.remove(&run_id);

        if let Err(e) = self.execution_log.persist(&result).await {
            tracing::error!(run_id = %run_id, error = %e, "failed to persist run result");
            return Err(e.into());
        }

        Ok(result)
    }

    /// Cancel an in-flight run. Returns false when no such run is active.
    ///
    /// Steps already dispatched finish; the rest are skipped and the run
    /// ends `Cancelled`.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.cancellation_tokens.get(&run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %run_id, "workflow run cancelled");
                true
            }
            None => false,
        }
    }

    fn spawn_run_timeout(&self, run_id: Uuid, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let run_timeout = Duration::from_secs(self.config.execution.run_timeout_secs);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(run_timeout) => {
                    tracing::warn!(
                        run_id = %run_id,
                        timeout_secs = run_timeout.as_secs(),
                        "run timed out, cancelling"
                    );
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
