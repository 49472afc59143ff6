//! [`MetricsSink`] that emits run telemetry as structured tracing events.
//!
//! Events go to the `flowline::metrics` target so they can be filtered or
//! routed independently of ordinary engine logs.

use flowline_core::metrics::MetricsSink;
use flowline_types::run::{AttemptRecord, BatchMetrics, StepStatus};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_step_duration(&self, run_id: Uuid, step_id: &str, duration_ms: u64, status: StepStatus) {
        tracing::info!(
            target: "flowline::metrics",
            run_id = %run_id,
            step_id,
            duration_ms,
            status = %status,
            "step duration"
        );
    }

    fn record_retry_attempt(&self, run_id: Uuid, attempt: &AttemptRecord) {
        tracing::info!(
            target: "flowline::metrics",
            run_id = %run_id,
            step_id = attempt.step_id.as_str(),
            attempt = attempt.attempt,
            succeeded = attempt.succeeded,
            category = ?attempt.category,
            duration_ms = attempt.duration_ms,
            backoff_ms = ?attempt.backoff_ms,
            "step attempt"
        );
    }

    fn record_parallel_efficiency(&self, run_id: Uuid, batch: &BatchMetrics) {
        tracing::info!(
            target: "flowline::metrics",
            run_id = %run_id,
            batch = batch.batch_index,
            batch_size = batch.batch_size,
            wall_clock_ms = batch.wall_clock_ms,
            sequential_estimate_ms = batch.sequential_estimate_ms,
            efficiency = batch.efficiency,
            "parallel efficiency"
        );
    }
}
