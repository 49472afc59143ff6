//! Batch scheduler: walks an execution plan batch by batch.
//!
//! Batches run strictly in order with a full barrier between them. Steps
//! inside a batch are spawned onto a `JoinSet` and run concurrently, bounded
//! by an optional semaphore. Readiness for each step is decided at the start
//! of its batch from the terminal states of its predecessors, so failures and
//! unselected branches propagate as `Skipped` without any step ever waiting
//! on a sibling.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_types::run::{
    ErrorSummary, FailureCategory, RunResult, RunStatus, StepFailureSummary, StepRunRecord,
    StepStatus,
};
use flowline_types::workflow::{EdgeKind, ExecutionPlan, StepId, WorkflowDefinition};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::metrics::MetricsRecorder;

use super::context::ExecutionContext;
use super::readiness::{evaluate, IncomingEdge, Readiness};
use super::retry::{RetryCoordinator, RetryPolicy, StepExecutionResult};
use super::step::{StepExecutor, StepOutput};

const CANCELLED_REASON: &str = "run cancelled";

/// A step resolved during pre-flight, ready to dispatch.
#[derive(Clone)]
pub struct PreparedStep {
    pub type_tag: String,
    pub executor: Arc<dyn StepExecutor>,
    pub policy: RetryPolicy,
    /// Bound on each individual attempt.
    pub attempt_timeout: Duration,
}

impl std::fmt::Debug for PreparedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStep")
            .field("type_tag", &self.type_tag)
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

/// Outcome of one dispatched step task.
struct Dispatched {
    result: StepExecutionResult,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

/// Runs one plan against one execution context.
pub struct BatchScheduler {
    coordinator: RetryCoordinator,
    metrics: MetricsRecorder,
    /// `None` means unbounded.
    semaphore: Option<Arc<Semaphore>>,
}

impl BatchScheduler {
    /// `max_parallelism == 0` leaves batches unbounded.
    pub fn new(coordinator: RetryCoordinator, metrics: MetricsRecorder, max_parallelism: usize) -> Self {
        let semaphore = (max_parallelism > 0).then(|| Arc::new(Semaphore::new(max_parallelism)));
        Self {
            coordinator,
            metrics,
            semaphore,
        }
    }

    /// Execute every batch of `plan` and fold the outcomes into a `RunResult`.
    ///
    /// `steps` must hold a prepared entry for every node in the plan. The
    /// returned result carries one record per node, in plan order.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        plan: &ExecutionPlan,
        steps: &HashMap<StepId, PreparedStep>,
        ctx: Arc<ExecutionContext>,
    ) -> RunResult {
        let started_at = Utc::now();
        let run_id = ctx.run_id();
        let incoming = incoming_edges(definition);
        let mut records: BTreeMap<StepId, StepRunRecord> = BTreeMap::new();

        for (batch_index, batch) in plan.execution_order.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(run_id = %run_id, batch = batch_index, "run cancelled, skipping remaining batches");
                for step_id in batch {
                    records.insert(
                        step_id.clone(),
                        skip(&ctx, step_id, type_tag(steps, step_id), batch_index, CANCELLED_REASON),
                    );
                }
                continue;
            }

            tracing::debug!(
                run_id = %run_id,
                batch = batch_index,
                steps = batch.len(),
                "processing batch"
            );

            let batch_started = Instant::now();
            let mut join_set = JoinSet::new();
            let mut dispatched: Vec<StepId> = Vec::new();

            for step_id in batch {
                let tag = type_tag(steps, step_id);
                let edges = incoming.get(step_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                match readiness(&ctx, step_id, edges) {
                    Readiness::Ready => {}
                    Readiness::Skip(reason) => {
                        tracing::debug!(run_id = %run_id, step_id = step_id.as_str(), reason = reason.as_str(), "skipping step");
                        records.insert(step_id.clone(), skip(&ctx, step_id, tag, batch_index, reason));
                        continue;
                    }
                    Readiness::Waiting => {
                        tracing::warn!(run_id = %run_id, step_id = step_id.as_str(), "predecessor not terminal at batch start");
                        records.insert(
                            step_id.clone(),
                            skip(&ctx, step_id, tag, batch_index, "predecessor did not finish"),
                        );
                        continue;
                    }
                }

                let Some(prepared) = steps.get(step_id).cloned() else {
                    tracing::warn!(run_id = %run_id, step_id = step_id.as_str(), "no prepared executor for step");
                    records.insert(
                        step_id.clone(),
                        skip(&ctx, step_id, tag, batch_index, "no executor prepared"),
                    );
                    continue;
                };

                mark(&ctx, step_id, StepStatus::Ready);
                dispatched.push(step_id.clone());

                let step_id = step_id.clone();
                let ctx = Arc::clone(&ctx);
                let coordinator = self.coordinator.clone();
                let semaphore = self.semaphore.clone();

                join_set.spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    if ctx.is_cancelled() {
                        return (step_id, None);
                    }

                    mark(&ctx, &step_id, StepStatus::Running);
                    let started_at = Utc::now();
                    let result = coordinator
                        .execute_with_retry(
                            prepared.executor.as_ref(),
                            &step_id,
                            &ctx,
                            &prepared.policy,
                            prepared.attempt_timeout,
                        )
                        .await;
                    let completed_at = Utc::now();
                    (
                        step_id,
                        Some(Dispatched {
                            result,
                            started_at,
                            completed_at,
                        }),
                    )
                });
            }

            // Barrier: every dispatched step reaches a terminal state here.
            let mut outcomes: HashMap<StepId, Option<Dispatched>> = HashMap::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((step_id, outcome)) => {
                        outcomes.insert(step_id, outcome);
                    }
                    Err(e) => {
                        tracing::error!(run_id = %run_id, batch = batch_index, error = %e, "step task join error");
                    }
                }
            }
            let wall_clock_ms = batch_started.elapsed().as_millis() as u64;

            let mut sequential_estimate_ms = 0;
            let mut executed = 0;
            for step_id in dispatched {
                let tag = type_tag(steps, &step_id);
                let record = match outcomes.remove(&step_id) {
                    Some(Some(dispatched)) => {
                        sequential_estimate_ms += dispatched.result.duration_ms;
                        executed += 1;
                        self.finish_step(&ctx, tag, batch_index, dispatched)
                    }
                    Some(None) => skip(&ctx, &step_id, tag, batch_index, CANCELLED_REASON),
                    None => {
                        mark_aborted(&ctx, &step_id);
                        StepRunRecord {
                            error: Some(StepFailureSummary {
                                step_id: step_id.clone(),
                                category: FailureCategory::Terminal,
                                message: "step task aborted".to_string(),
                                attempts: 0,
                            }),
                            status: StepStatus::Failed,
                            skip_reason: None,
                            ..StepRunRecord::skipped(step_id.as_str(), tag, batch_index, "")
                        }
                    }
                };
                records.insert(step_id, record);
            }

            if executed > 0 {
                self.metrics.record_parallel_efficiency(
                    batch_index,
                    executed,
                    wall_clock_ms,
                    sequential_estimate_ms,
                );
            }

            tracing::debug!(
                run_id = %run_id,
                batch = batch_index,
                wall_clock_ms,
                sequential_estimate_ms,
                "batch complete"
            );
        }

        let step_results: Vec<StepRunRecord> = plan
            .execution_order
            .iter()
            .flatten()
            .filter_map(|id| records.remove(id))
            .collect();

        let status = run_status(&step_results, ctx.is_cancelled());
        let error_summary = error_summary(&step_results, status);
        let metrics = self.metrics.flush().await;

        tracing::info!(
            run_id = %run_id,
            status = %status,
            steps = step_results.len(),
            "run finished"
        );

        RunResult {
            run_id,
            workflow_id: ctx.workflow_id().to_string(),
            status,
            step_results,
            started_at,
            completed_at: Utc::now(),
            error_summary,
            metrics,
        }
    }

    /// Fold a dispatched step's outcome into the context and build its record.
    fn finish_step(
        &self,
        ctx: &ExecutionContext,
        type_tag: &str,
        batch: usize,
        dispatched: Dispatched,
    ) -> StepRunRecord {
        let Dispatched {
            result,
            started_at,
            completed_at,
        } = dispatched;
        let step_id = result.step_id.as_str();

        mark(ctx, step_id, result.status);
        self.metrics
            .record_step_duration(step_id, result.duration_ms, result.status);

        let output = result.output.map(|output| {
            if let StepOutput::Branch { rejected, .. } = &output {
                ctx.reject_branches(step_id, rejected.iter().cloned());
            }
            output.into_value()
        });
        if let Some(value) = &output {
            if let Err(e) = ctx.set_step_output(step_id, value.clone()) {
                tracing::warn!(step_id, error = %e, "step output not recorded");
            }
        }

        let error = result.error.map(|failure| {
            tracing::warn!(
                run_id = %ctx.run_id(),
                step_id,
                category = %failure.category(),
                attempts = failure.attempts(),
                error = %failure,
                "step failed"
            );
            StepFailureSummary {
                step_id: step_id.to_string(),
                category: failure.category(),
                message: failure.to_string(),
                attempts: failure.attempts(),
            }
        });

        StepRunRecord {
            step_id: result.step_id.clone(),
            type_tag: type_tag.to_string(),
            status: result.status,
            batch,
            output,
            duration_ms: result.duration_ms,
            attempts: result.attempts,
            started_at: Some(started_at),
            completed_at: Some(completed_at),
            error,
            skip_reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Incoming edges per target step, AND edges from `depends_on` included.
fn incoming_edges(definition: &WorkflowDefinition) -> HashMap<StepId, Vec<(StepId, EdgeKind)>> {
    let mut incoming: HashMap<StepId, Vec<(StepId, EdgeKind)>> = HashMap::new();
    for edge in definition.all_edges() {
        incoming.entry(edge.to).or_default().push((edge.from, edge.kind));
    }
    incoming
}

fn readiness(ctx: &ExecutionContext, step_id: &str, edges: &[(StepId, EdgeKind)]) -> Readiness {
    let view: Vec<IncomingEdge<'_>> = edges
        .iter()
        .map(|(from, kind)| IncomingEdge {
            from,
            kind,
            status: ctx.status(from).unwrap_or(StepStatus::Pending),
            active: ctx.edge_active(from, step_id),
        })
        .collect();
    evaluate(&view)
}

fn type_tag<'a>(steps: &'a HashMap<StepId, PreparedStep>, step_id: &str) -> &'a str {
    steps.get(step_id).map(|s| s.type_tag.as_str()).unwrap_or("")
}

fn mark(ctx: &ExecutionContext, step_id: &str, status: StepStatus) -> bool {
    match ctx.transition(step_id, status) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(step_id, error = %e, "rejected step status transition");
            false
        }
    }
}

/// Fail a step whose task died, whether or not it had started running.
fn mark_aborted(ctx: &ExecutionContext, step_id: &str) -> bool {
    if ctx.status(step_id) != Some(StepStatus::Running) && !mark(ctx, step_id, StepStatus::Running) {
        return false;
    }
    mark(ctx, step_id, StepStatus::Failed)
}

fn skip(
    ctx: &ExecutionContext,
    step_id: &str,
    type_tag: &str,
    batch: usize,
    reason: impl Into<String>,
) -> StepRunRecord {
    mark(ctx, step_id, StepStatus::Skipped);
    StepRunRecord::skipped(step_id, type_tag, batch, reason)
}

/// Overall status from per-step outcomes.
pub fn run_status(records: &[StepRunRecord], cancelled: bool) -> RunStatus {
    if cancelled {
        return RunStatus::Cancelled;
    }
    let failed = records.iter().any(|r| r.status == StepStatus::Failed);
    let succeeded = records.iter().any(|r| r.status == StepStatus::Succeeded);
    match (failed, succeeded) {
        (false, _) => RunStatus::Succeeded,
        (true, true) => RunStatus::CompletedWithFailures,
        (true, false) => RunStatus::Failed,
    }
}

fn error_summary(records: &[StepRunRecord], status: RunStatus) -> Option<ErrorSummary> {
    let failures: Vec<StepFailureSummary> = records.iter().filter_map(|r| r.error.clone()).collect();
    if failures.is_empty() && status != RunStatus::Cancelled {
        return None;
    }
    let message = match status {
        RunStatus::Cancelled => "run cancelled".to_string(),
        _ => {
            let skipped = records.iter().filter(|r| r.status == StepStatus::Skipped).count();
            format!("{} step(s) failed, {skipped} skipped", failures.len())
        }
    };
    Some(ErrorSummary { message, failures })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
