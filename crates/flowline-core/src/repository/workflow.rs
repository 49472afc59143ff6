//! Workflow storage ports: definition lookup and run result persistence.

use flowline_types::error::{ExecutionLogError, RepositoryError};
use flowline_types::run::RunResult;
use flowline_types::workflow::WorkflowDefinition;

/// Source of frozen workflow definitions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    /// Fetch a definition by workflow id. `Ok(None)` when it does not exist.
    fn get_definition(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;
}

/// Sink for terminal run records.
pub trait ExecutionLog: Send + Sync {
    /// Persist a completed run. Called exactly once per run.
    fn persist(
        &self,
        result: &RunResult,
    ) -> impl std::future::Future<Output = Result<(), ExecutionLogError>> + Send;
}

/// Execution log that keeps nothing, for callers that do not persist runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardExecutionLog;

impl ExecutionLog for DiscardExecutionLog {
    async fn persist(&self, result: &RunResult) -> Result<(), ExecutionLogError> {
        tracing::trace!(run_id = %result.run_id, "run result discarded");
        Ok(())
    }
}
