//! Run telemetry: step durations, executor attempts, and parallel efficiency.
//!
//! `MetricsRecorder` is a cheap cloneable handle. Recording only enqueues an
//! event on an unbounded channel; a background task forwards each event to
//! the configured `MetricsSink` and aggregates the run summary. `flush`
//! waits until every event enqueued before it has been processed.

use std::sync::Arc;

use flowline_types::run::{AttemptRecord, BatchMetrics, RunMetricsSummary, StepStatus};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MetricsSink
// ---------------------------------------------------------------------------

/// Destination for telemetry. Called from the recorder's background task,
/// never from a step's task.
pub trait MetricsSink: Send + Sync {
    fn record_step_duration(&self, run_id: Uuid, step_id: &str, duration_ms: u64, status: StepStatus);

    /// Called once per executor attempt, whatever its outcome. `backoff_ms`
    /// is set only when another attempt follows.
    fn record_retry_attempt(&self, run_id: Uuid, attempt: &AttemptRecord);

    fn record_parallel_efficiency(&self, run_id: Uuid, batch: &BatchMetrics);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_step_duration(&self, _: Uuid, _: &str, _: u64, _: StepStatus) {}

    fn record_retry_attempt(&self, _: Uuid, _: &AttemptRecord) {}

    fn record_parallel_efficiency(&self, _: Uuid, _: &BatchMetrics) {}
}

// ---------------------------------------------------------------------------
// MetricsRecorder
// ---------------------------------------------------------------------------

enum MetricEvent {
    StepDuration {
        step_id: String,
        duration_ms: u64,
        status: StepStatus,
    },
    RetryAttempt(AttemptRecord),
    ParallelEfficiency(BatchMetrics),
    Flush(oneshot::Sender<RunMetricsSummary>),
}

/// Handle for recording run telemetry off the critical path.
#[derive(Clone)]
pub struct MetricsRecorder {
    run_id: Uuid,
    tx: mpsc::UnboundedSender<MetricEvent>,
}

impl MetricsRecorder {
    /// Spawn the aggregation task for a run. Must be called inside a tokio runtime.
    pub fn start(run_id: Uuid, sink: Arc<dyn MetricsSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(aggregate(run_id, sink, rx));
        Self { run_id, tx }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_step_duration(&self, step_id: &str, duration_ms: u64, status: StepStatus) {
        self.send(MetricEvent::StepDuration {
            step_id: step_id.to_string(),
            duration_ms,
            status,
        });
    }

    pub fn record_retry_attempt(&self, attempt: AttemptRecord) {
        self.send(MetricEvent::RetryAttempt(attempt));
    }

    /// Record one batch: efficiency = sequential estimate / wall clock.
    pub fn record_parallel_efficiency(
        &self,
        batch_index: usize,
        batch_size: usize,
        wall_clock_ms: u64,
        sequential_estimate_ms: u64,
    ) {
        self.send(MetricEvent::ParallelEfficiency(BatchMetrics {
            batch_index,
            batch_size,
            wall_clock_ms,
            sequential_estimate_ms,
            efficiency: efficiency(sequential_estimate_ms, wall_clock_ms),
        }));
    }

    /// Wait for every previously recorded event and return the run summary.
    pub async fn flush(&self) -> RunMetricsSummary {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(MetricEvent::Flush(reply)).is_err() {
            tracing::warn!(run_id = %self.run_id, "metrics recorder stopped before flush");
            return RunMetricsSummary::default();
        }
        rx.await.unwrap_or_default()
    }

    fn send(&self, event: MetricEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(run_id = %self.run_id, "metrics recorder closed, dropping event");
        }
    }
}

fn efficiency(sequential_ms: u64, wall_clock_ms: u64) -> f64 {
    if wall_clock_ms == 0 {
        1.0
    } else {
        sequential_ms as f64 / wall_clock_ms as f64
    }
}

async fn aggregate(
    run_id: Uuid,
    sink: Arc<dyn MetricsSink>,
    mut rx: mpsc::UnboundedReceiver<MetricEvent>,
) {
    let mut summary = RunMetricsSummary::default();

    while let Some(event) = rx.recv().await {
        match event {
            MetricEvent::StepDuration {
                step_id,
                duration_ms,
                status,
            } => {
                summary.steps_recorded += 1;
                sink.record_step_duration(run_id, &step_id, duration_ms, status);
            }
            MetricEvent::RetryAttempt(attempt) => {
                summary.attempts_recorded += 1;
                if attempt.backoff_ms.is_some() {
                    summary.retry_attempts += 1;
                }
                sink.record_retry_attempt(run_id, &attempt);
            }
            MetricEvent::ParallelEfficiency(batch) => {
                summary.total_wall_clock_ms += batch.wall_clock_ms;
                summary.total_sequential_estimate_ms += batch.sequential_estimate_ms;
                summary.parallel_efficiency = efficiency(
                    summary.total_sequential_estimate_ms,
                    summary.total_wall_clock_ms,
                );
                sink.record_parallel_efficiency(run_id, &batch);
                summary.batches.push(batch);
            }
            MetricEvent::Flush(reply) => {
                let _ = reply.send(summary.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowline_types::run::FailureCategory;
    use std::sync::Mutex;

    fn attempt(step_id: &str, attempt: u32, backoff_ms: Option<u64>) -> AttemptRecord {
        AttemptRecord {
            step_id: step_id.to_string(),
            attempt,
            succeeded: backoff_ms.is_none(),
            category: backoff_ms.map(|_| FailureCategory::Transient),
            message: None,
            duration_ms: 5,
            backoff_ms,
            recorded_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<String>>,
    }

    impl MetricsSink for CollectingSink {
        fn record_step_duration(&self, _: Uuid, step_id: &str, duration_ms: u64, _: StepStatus) {
            self.events
                .lock()
                .unwrap()
                .push(format!("duration:{step_id}:{duration_ms}"));
        }

        fn record_retry_attempt(&self, _: Uuid, attempt: &AttemptRecord) {
            self.events
                .lock()
                .unwrap()
                .push(format!("attempt:{}:{}", attempt.step_id, attempt.attempt));
        }

        fn record_parallel_efficiency(&self, _: Uuid, batch: &BatchMetrics) {
            self.events
                .lock()
                .unwrap()
                .push(format!("batch:{}", batch.batch_index));
        }
    }

    #[tokio::test]
    async fn flush_returns_aggregated_summary() {
        let sink = Arc::new(CollectingSink::default());
        let recorder = MetricsRecorder::start(Uuid::now_v7(), sink.clone());

        recorder.record_step_duration("b", 100, StepStatus::Succeeded);
        recorder.record_step_duration("c", 100, StepStatus::Succeeded);
        recorder.record_retry_attempt(attempt("c", 1, Some(100)));
        recorder.record_retry_attempt(attempt("c", 2, None));
        recorder.record_parallel_efficiency(0, 2, 100, 200);
        recorder.record_parallel_efficiency(1, 1, 100, 100);

        let summary = recorder.flush().await;
        assert_eq!(summary.steps_recorded, 2);
        assert_eq!(summary.attempts_recorded, 2);
        assert_eq!(summary.retry_attempts, 1);
        assert_eq!(summary.batches.len(), 2);
        assert!((summary.batches[0].efficiency - 2.0).abs() < 1e-9);
        assert!((summary.parallel_efficiency - 1.5).abs() < 1e-9);

        // All events reached the sink before flush returned.
        let events = sink.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "duration:b:100",
                "duration:c:100",
                "attempt:c:1",
                "attempt:c:2",
                "batch:0",
                "batch:1"
            ]
        );
    }

    #[tokio::test]
    async fn events_from_clones_are_included() {
        let recorder = MetricsRecorder::start(Uuid::now_v7(), Arc::new(NoopMetricsSink));
        let mut handles = Vec::new();
        for i in 0..8 {
            let r = recorder.clone();
            handles.push(tokio::spawn(async move {
                r.record_step_duration(&format!("s{i}"), 1, StepStatus::Succeeded);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(recorder.flush().await.steps_recorded, 8);
    }

    #[test]
    fn zero_wall_clock_counts_as_fully_efficient() {
        assert_eq!(efficiency(0, 0), 1.0);
        assert_eq!(efficiency(300, 100), 3.0);
    }
}
