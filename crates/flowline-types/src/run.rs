//! Run-time status, attempt records, and the terminal `RunResult`.
//!
//! These are the records a run produces. They are serializable so the
//! execution log can persist a single self-contained document per run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::StepId;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a single step within a run.
///
/// `Pending -> Ready -> Running -> {Succeeded | Failed | Skipped}`. `Running`
/// spans every retry attempt. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Whether the step has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        match (self, next) {
            (Pending, Ready) | (Pending, Skipped) => true,
            (Ready, Running) | (Ready, Skipped) => true,
            (Running, Succeeded) | (Running, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every dispatched step succeeded.
    Succeeded,
    /// At least one step failed while others succeeded.
    CompletedWithFailures,
    /// Steps failed and none succeeded.
    Failed,
    /// The run was cancelled between batches or timed out.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::CompletedWithFailures => "completed_with_failures",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Classification of a step failure as reported in error summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Configuration,
    Cycle,
    Transient,
    Terminal,
    RetryBudgetExhausted,
    Cancelled,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::Configuration => "configuration",
            FailureCategory::Cycle => "cycle",
            FailureCategory::Transient => "transient",
            FailureCategory::Terminal => "terminal",
            FailureCategory::RetryBudgetExhausted => "retry_budget_exhausted",
            FailureCategory::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Attempt & step records
// ---------------------------------------------------------------------------

/// One invocation of a step executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub step_id: StepId,
    /// 1-based attempt index.
    pub attempt: u32,
    pub succeeded: bool,
    /// Failure classification; `None` for a successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
    /// Backoff applied after this attempt, if another attempt followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

/// Per-step failure entry in the run's error summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailureSummary {
    pub step_id: StepId,
    pub category: FailureCategory,
    pub message: String,
    pub attempts: u32,
}

/// Final record of one step in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRunRecord {
    pub step_id: StepId,
    pub type_tag: String,
    pub status: StepStatus,
    /// Batch index from the execution plan.
    pub batch: usize,
    /// Output value for succeeded steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Total time spent running, including backoff between attempts.
    pub duration_ms: u64,
    /// Attempts made. Zero for skipped steps.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailureSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StepRunRecord {
    /// A record for a step that never ran.
    pub fn skipped(
        step_id: impl Into<String>,
        type_tag: impl Into<String>,
        batch: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            type_tag: type_tag.into(),
            status: StepStatus::Skipped,
            batch,
            output: None,
            duration_ms: 0,
            attempts: 0,
            started_at: None,
            completed_at: Some(Utc::now()),
            error: None,
            skip_reason: Some(reason.into()),
        }
    }
}

/// Human-oriented summary of everything that went wrong in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub message: String,
    #[serde(default)]
    pub failures: Vec<StepFailureSummary>,
}

// ---------------------------------------------------------------------------
// Metrics summary
// ---------------------------------------------------------------------------

/// Parallel-efficiency sample for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub batch_index: usize,
    pub batch_size: usize,
    pub wall_clock_ms: u64,
    /// Sum of the batch members' individual durations.
    pub sequential_estimate_ms: u64,
    /// `sequential_estimate_ms / wall_clock_ms`; 1.0 when wall clock is zero.
    pub efficiency: f64,
}

/// Aggregated telemetry for a run, produced by the metrics recorder on flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetricsSummary {
    #[serde(default)]
    pub batches: Vec<BatchMetrics>,
    pub total_wall_clock_ms: u64,
    pub total_sequential_estimate_ms: u64,
    /// Run-level efficiency across all batches.
    pub parallel_efficiency: f64,
    /// Number of executor attempts reported, successful ones included.
    #[serde(default)]
    pub attempts_recorded: u32,
    /// Number of failed attempts that were followed by a retry.
    pub retry_attempts: u32,
    /// Number of step durations recorded.
    pub steps_recorded: u32,
}

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// The single terminal record produced by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    /// One record per step, in plan order.
    pub step_results: Vec<StepRunRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<ErrorSummary>,
    #[serde(default)]
    pub metrics: RunMetricsSummary,
}

impl RunResult {
    /// Look up a step record.
    pub fn step(&self, step_id: &str) -> Option<&StepRunRecord> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }

    /// Count of steps in the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.step_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_transitions() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Ready));
        assert!(StepStatus::Ready.can_transition_to(StepStatus::Running));
        assert!(StepStatus::Running.can_transition_to(StepStatus::Failed));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Skipped));
        assert!(!StepStatus::Succeeded.can_transition_to(StepStatus::Running));
        assert!(!StepStatus::Skipped.can_transition_to(StepStatus::Ready));
        assert!(!StepStatus::Running.can_transition_to(StepStatus::Skipped));
    }

    #[test]
    fn terminal_states() {
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(!StepStatus::Pending.is_terminal());
    }

    #[test]
    fn run_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::CompletedWithFailures).unwrap();
        assert_eq!(json, "\"completed_with_failures\"");
        assert_eq!(
            RunStatus::CompletedWithFailures.to_string(),
            "completed_with_failures"
        );
    }

    #[test]
    fn skipped_record_has_no_attempts() {
        let record = StepRunRecord::skipped("b2", "output", 2, "branch not selected");
        assert_eq!(record.status, StepStatus::Skipped);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.skip_reason.as_deref(), Some("branch not selected"));
    }
}
