//! Retry policy and the coordinator that wraps every step invocation.
//!
//! `RetryPolicy` is a plain value (attempt budget, exponential backoff
//! parameters, jitter flag) plus an injected classification predicate.
//! `RetryCoordinator` runs one step under a policy: terminal failures stop
//! immediately, retryable ones back off and try again until the budget is
//! spent. Backoff suspends only the step's own task and is interrupted by
//! run cancellation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use flowline_types::run::{AttemptRecord, FailureCategory, StepStatus};
use flowline_types::workflow::{RetryPolicyConfig, StepId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::time::Instant;

use crate::metrics::MetricsRecorder;

use super::context::ExecutionContext;
use super::definition::retry_config_issues;
use super::step::{failure_category, StepError, StepExecutor, StepInvocation, StepOutput};

/// Maximum jitter as a fraction of the computed delay.
pub const JITTER_FRACTION: f64 = 0.1;

/// Decides whether a failed attempt may be retried.
pub type RetryClassifier = Arc<dyn Fn(&StepError) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid retry policy: {0}")]
pub struct RetryPolicyError(pub String);

/// Attempt budget, backoff curve, and error classifier for one step.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    classifier: RetryClassifier,
}

impl RetryPolicy {
    /// Build a policy from config, classifying with [`StepError::is_retryable`].
    pub fn from_config(config: &RetryPolicyConfig) -> Result<Self, RetryPolicyError> {
        let issues = retry_config_issues(config);
        if !issues.is_empty() {
            return Err(RetryPolicyError(issues.join("; ")));
        }
        Ok(Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
            classifier: Arc::new(StepError::is_retryable),
        })
    }

    /// Replace the error classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&StepError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    pub fn is_retryable(&self, error: &StepError) -> bool {
        (self.classifier)(error)
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter:
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`.
    ///
    /// Non-decreasing in `attempt` because `multiplier >= 1`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let ms = (base_ms * self.multiplier.powi(exponent)).min(max_ms);
        Duration::from_millis(ms as u64)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Jitter
// ---------------------------------------------------------------------------

/// Source of backoff jitter. Seeded for reproducible runs.
#[derive(Debug)]
pub struct Jitter {
    rng: Mutex<StdRng>,
}

impl Jitter {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    /// Add uniform jitter in `[0, delay * JITTER_FRACTION]`.
    pub fn apply(&self, delay: Duration) -> Duration {
        let sample: f64 = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .r#gen();
        let extra_ms = delay.as_millis() as f64 * JITTER_FRACTION * sample;
        delay + Duration::from_millis(extra_ms as u64)
    }
}

/// Delay sequence for one step: jittered, capped, and never shrinking.
pub fn backoff_delay(
    policy: &RetryPolicy,
    jitter: &Jitter,
    attempt: u32,
    previous: Duration,
) -> Duration {
    let mut delay = policy.calculate_delay(attempt);
    if policy.jitter() {
        delay = jitter.apply(delay);
    }
    delay.max(previous).min(policy.max_delay())
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Why a step ended in `Failed`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepFailure {
    #[error("terminal failure on attempt {attempt}: {error}")]
    Terminal { error: StepError, attempt: u32 },

    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        attempts: u32,
        last: StepError,
        history: Vec<AttemptRecord>,
    },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl StepFailure {
    pub fn category(&self) -> FailureCategory {
        match self {
            StepFailure::Terminal { error, .. } => failure_category(error, false),
            StepFailure::RetryBudgetExhausted { .. } => FailureCategory::RetryBudgetExhausted,
            StepFailure::Cancelled { .. } => FailureCategory::Cancelled,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            StepFailure::Terminal { attempt, .. } => *attempt,
            StepFailure::RetryBudgetExhausted { attempts, .. } => *attempts,
            StepFailure::Cancelled { attempts } => *attempts,
        }
    }
}

/// Outcome of running one step under the coordinator.
#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    pub step_id: StepId,
    /// `Succeeded` or `Failed`.
    pub status: StepStatus,
    pub output: Option<StepOutput>,
    /// Wall time across all attempts and backoff waits.
    pub duration_ms: u64,
    pub attempts: u32,
    pub error: Option<StepFailure>,
}

// ---------------------------------------------------------------------------
// RetryCoordinator
// ---------------------------------------------------------------------------

/// Runs step executors under a retry policy for one run.
#[derive(Clone)]
pub struct RetryCoordinator {
    jitter: Arc<Jitter>,
    metrics: MetricsRecorder,
}

impl RetryCoordinator {
    pub fn new(jitter: Arc<Jitter>, metrics: MetricsRecorder) -> Self {
        Self { jitter, metrics }
    }

    /// Invoke `executor` until it succeeds, fails terminally, or exhausts
    /// `policy`'s attempt budget. Each attempt is bounded by `attempt_timeout`;
    /// a timeout counts as a retryable failure. Every attempt is appended to
    /// the context's history.
    pub async fn execute_with_retry(
        &self,
        executor: &dyn StepExecutor,
        step_id: &str,
        ctx: &Arc<ExecutionContext>,
        policy: &RetryPolicy,
        attempt_timeout: Duration,
    ) -> StepExecutionResult {
        let started = Instant::now();
        let mut previous_delay = Duration::ZERO;
        let finish = |attempts: u32, output: Option<StepOutput>, error: Option<StepFailure>| {
            StepExecutionResult {
                step_id: step_id.to_string(),
                status: if error.is_none() {
                    StepStatus::Succeeded
                } else {
                    StepStatus::Failed
                },
                output,
                duration_ms: started.elapsed().as_millis() as u64,
                attempts,
                error,
            }
        };

        let mut attempt = 1;
        loop {
            let invocation = StepInvocation {
                step_id: step_id.to_string(),
                attempt,
                context: Arc::clone(ctx),
            };
            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(attempt_timeout, executor.execute(&invocation)).await
            {
                Ok(result) => result,
                Err(_elapsed) => Err(StepError::Timeout(attempt_timeout.as_millis() as u64)),
            };
            let attempt_ms = attempt_started.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(output) => {
                    self.record(ctx, attempt_record(step_id, attempt, None, attempt_ms, None));
                    return finish(attempt, Some(output), None);
                }
                Err(error) => error,
            };

            let retryable = policy.is_retryable(&error);
            let category = failure_category(&error, retryable);

            if error == StepError::Cancelled {
                self.record(ctx, attempt_record(step_id, attempt, Some((category, &error)), attempt_ms, None));
                return finish(attempt, None, Some(StepFailure::Cancelled { attempts: attempt }));
            }

            if !retryable {
                tracing::warn!(
                    step_id,
                    attempt,
                    error = %error,
                    "step failed with terminal error"
                );
                self.record(ctx, attempt_record(step_id, attempt, Some((category, &error)), attempt_ms, None));
                return finish(
                    attempt,
                    None,
                    Some(StepFailure::Terminal { error, attempt }),
                );
            }

            if attempt >= policy.max_attempts() {
                self.record(ctx, attempt_record(step_id, attempt, Some((category, &error)), attempt_ms, None));
                tracing::warn!(
                    step_id,
                    attempts = attempt,
                    error = %error,
                    "retry budget exhausted"
                );
                return finish(
                    attempt,
                    None,
                    Some(StepFailure::RetryBudgetExhausted {
                        attempts: attempt,
                        last: error,
                        history: ctx.attempts_for(step_id),
                    }),
                );
            }

            let mut delay = backoff_delay(policy, &self.jitter, attempt, previous_delay);
            if let Some(hint) = error.retry_after() {
                delay = delay.max(hint).min(policy.max_delay());
            }
            previous_delay = delay;
            let delay_ms = delay.as_millis() as u64;
            self.record(
                ctx,
                attempt_record(step_id, attempt, Some((category, &error)), attempt_ms, Some(delay_ms)),
            );

            tracing::warn!(
                step_id,
                attempt,
                max_attempts = policy.max_attempts(),
                delay_ms,
                error = %error,
                "retrying step after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation_token().cancelled() => {
                    tracing::debug!(step_id, attempt, "backoff interrupted by cancellation");
                    return finish(attempt, None, Some(StepFailure::Cancelled { attempts: attempt }));
                }
            }

            attempt += 1;
        }
    }

    /// Append an attempt to the run's history and report it to metrics.
    fn record(&self, ctx: &ExecutionContext, record: AttemptRecord) {
        self.metrics.record_retry_attempt(record.clone());
        ctx.record_attempt(record);
    }
}

fn attempt_record(
    step_id: &str,
    attempt: u32,
    failure: Option<(FailureCategory, &StepError)>,
    duration_ms: u64,
    backoff_ms: Option<u64>,
) -> AttemptRecord {
    AttemptRecord {
        step_id: step_id.to_string(),
        attempt,
        succeeded: failure.is_none(),
        category: failure.map(|(category, _)| category),
        message: failure.map(|(_, error)| error.to_string()),
        duration_ms,
        backoff_ms,
        recorded_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use flowline_types::workflow::WorkflowDefinition;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::metrics::NoopMetricsSink;
    use crate::workflow::step::BoxFuture;

    fn config(max_attempts: u32, base: u64, max: u64, multiplier: f64, jitter: bool) -> RetryPolicyConfig {
        RetryPolicyConfig {
            max_attempts,
            base_delay_ms: base,
            max_delay_ms: max,
            multiplier,
            jitter,
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        error: StepError,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, error: StepError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl StepExecutor for Flaky {
        fn step_type(&self) -> &str {
            "flaky"
        }

        fn validate_config(&self, _: &BTreeSet<String>) -> Result<(), String> {
            Ok(())
        }

        fn execute<'a>(&'a self, _: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= self.failures {
                    Err(self.error.clone())
                } else {
                    Ok(StepOutput::Value(json!(n)))
                }
            })
        }
    }

    struct Sleeper;

    impl StepExecutor for Sleeper {
        fn step_type(&self) -> &str {
            "sleeper"
        }

        fn validate_config(&self, _: &BTreeSet<String>) -> Result<(), String> {
            Ok(())
        }

        fn execute<'a>(&'a self, _: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(StepOutput::Value(json!(null)))
            })
        }
    }

    fn context() -> Arc<ExecutionContext> {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "nodes": [ { "id": "x", "type": "flaky" } ]
        }))
        .unwrap();
        Arc::new(ExecutionContext::new(
            Uuid::now_v7(),
            &def,
            json!({}),
            CancellationToken::new(),
        ))
    }

    fn coordinator() -> RetryCoordinator {
        RetryCoordinator::new(
            Arc::new(Jitter::seeded(42)),
            MetricsRecorder::start(Uuid::now_v7(), Arc::new(NoopMetricsSink)),
        )
    }

    fn coordinator_with_metrics() -> (RetryCoordinator, MetricsRecorder) {
        let metrics = MetricsRecorder::start(Uuid::now_v7(), Arc::new(NoopMetricsSink));
        let coordinator = RetryCoordinator::new(Arc::new(Jitter::seeded(42)), metrics.clone());
        (coordinator, metrics)
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    // -----------------------------------------------------------------------
    // Delay curve
    // -----------------------------------------------------------------------

    #[test]
    fn delay_is_exponential_and_capped() {
        let policy = RetryPolicy::from_config(&config(10, 100, 1_000, 2.0, false)).unwrap();
        let delays: Vec<u64> = (1..=6)
            .map(|a| policy.calculate_delay(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn delay_is_monotone_and_bounded_for_many_policies() {
        for (base, max, mult) in [(1, 10, 1.0), (50, 5_000, 1.5), (100, 10_000, 2.0), (7, 7, 3.0)] {
            for seed in 0..5u64 {
                let policy = RetryPolicy::from_config(&config(20, base, max, mult, true)).unwrap();
                let jitter = Jitter::seeded(seed);
                let mut previous = Duration::ZERO;
                for attempt in 1..=20 {
                    let pure = policy.calculate_delay(attempt);
                    if attempt > 1 {
                        assert!(pure >= policy.calculate_delay(attempt - 1));
                    }
                    let delay = backoff_delay(&policy, &jitter, attempt, previous);
                    assert!(delay >= previous);
                    assert!(delay <= policy.max_delay());
                    previous = delay;
                }
            }
        }
    }

    #[test]
    fn jitter_is_deterministic_for_a_seed() {
        let policy = RetryPolicy::from_config(&config(10, 1_000, 60_000, 2.0, true)).unwrap();
        let run = |seed| {
            let jitter = Jitter::seeded(seed);
            let mut previous = Duration::ZERO;
            (1..=8)
                .map(|a| {
                    previous = backoff_delay(&policy, &jitter, a, previous);
                    previous
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let jitter = Jitter::seeded(1);
        for _ in 0..100 {
            let d = jitter.apply(Duration::from_millis(1_000));
            assert!(d >= Duration::from_millis(1_000));
            assert!(d <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn invalid_policies_rejected() {
        assert!(RetryPolicy::from_config(&config(0, 100, 1_000, 2.0, true)).is_err());
        assert!(RetryPolicy::from_config(&config(3, 100, 1_000, 0.5, true)).is_err());
        assert!(RetryPolicy::from_config(&config(3, 2_000, 1_000, 2.0, true)).is_err());
    }

    // -----------------------------------------------------------------------
    // Coordinator
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_exhaust_budget() {
        let policy = RetryPolicy::from_config(&config(3, 100, 10_000, 2.0, false)).unwrap();
        let exec = Flaky::new(u32::MAX, StepError::Transient("connection reset".into()));
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 3);
        // 100ms + 200ms of backoff on the paused clock
        assert_eq!(result.duration_ms, 300);
        match result.error.unwrap() {
            StepFailure::RetryBudgetExhausted { attempts, last, history } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, StepError::Transient("connection reset".into()));
                assert_eq!(history.len(), 3);
                assert_eq!(history[0].backoff_ms, Some(100));
                assert_eq!(history[1].backoff_ms, Some(200));
                assert_eq!(history[2].backoff_ms, None);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert_eq!(ctx.retry_count("x"), 2);
        assert_eq!(ctx.error_history().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_after_one_attempt() {
        let policy = RetryPolicy::from_config(&config(5, 100, 10_000, 2.0, true)).unwrap();
        let exec = Flaky::new(u32::MAX, StepError::Validation("bad payload".into()));
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
            .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
        let failure = result.error.unwrap();
        assert_eq!(failure.category(), FailureCategory::Terminal);
        assert_eq!(failure.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::from_config(&config(3, 10, 1_000, 2.0, true)).unwrap();
        let exec = Flaky::new(2, StepError::Upstream { status: 503, message: "busy".into() });
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
            .await;

        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.output.unwrap().into_value(), json!(3));
        assert_eq!(ctx.attempts_for("x").len(), 3);
        assert_eq!(ctx.error_history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_overrides_default() {
        let policy = RetryPolicy::from_config(&config(4, 10, 1_000, 2.0, false))
            .unwrap()
            .with_classifier(|_| false);
        let exec = Flaky::new(u32::MAX, StepError::Transient("flaky".into()));
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
            .await;
        assert_eq!(result.attempts, 1);
        assert!(matches!(result.error, Some(StepFailure::Terminal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_retryable() {
        let policy = RetryPolicy::from_config(&config(2, 10, 1_000, 2.0, false)).unwrap();
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&Sleeper, "x", &ctx, &policy, Duration::from_millis(50))
            .await;

        assert_eq!(result.attempts, 2);
        match result.error.unwrap() {
            StepFailure::RetryBudgetExhausted { last, .. } => {
                assert_eq!(last, StepError::Timeout(50));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy::from_config(&config(5, 10_000, 60_000, 2.0, false)).unwrap();
        let exec = Flaky::new(u32::MAX, StepError::Transient("down".into()));
        let ctx = context();
        let token = ctx.cancellation_token().clone();

        let coordinator = coordinator();
        let handle = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                coordinator
                    .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error.unwrap().category(), FailureCategory::Cancelled);
        assert!(result.duration_ms < 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_reaches_metrics() {
        let policy = RetryPolicy::from_config(&config(3, 100, 10_000, 2.0, false)).unwrap();

        let (coordinator, metrics) = coordinator_with_metrics();
        coordinator
            .execute_with_retry(&Flaky::new(0, StepError::Transient("x".into())), "x", &context(), &policy, TIMEOUT)
            .await;
        let summary = metrics.flush().await;
        assert_eq!(summary.attempts_recorded, 1);
        assert_eq!(summary.retry_attempts, 0);

        let (coordinator, metrics) = coordinator_with_metrics();
        coordinator
            .execute_with_retry(&Flaky::new(u32::MAX, StepError::Permission("no".into())), "x", &context(), &policy, TIMEOUT)
            .await;
        assert_eq!(metrics.flush().await.attempts_recorded, 1);

        let (coordinator, metrics) = coordinator_with_metrics();
        coordinator
            .execute_with_retry(&Flaky::new(u32::MAX, StepError::Transient("x".into())), "x", &context(), &policy, TIMEOUT)
            .await;
        let summary = metrics.flush().await;
        assert_eq!(summary.attempts_recorded, 3);
        assert_eq!(summary.retry_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_lengthens_backoff() {
        let policy = RetryPolicy::from_config(&config(3, 100, 10_000, 2.0, false)).unwrap();
        let exec = Flaky::new(1, StepError::RateLimited { retry_after_ms: Some(2_000) });
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
            .await;

        assert_eq!(result.status, StepStatus::Succeeded);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.duration_ms, 2_000);
        assert_eq!(ctx.attempts_for("x")[0].backoff_ms, Some(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_is_capped_by_max_delay() {
        let policy = RetryPolicy::from_config(&config(3, 100, 500, 2.0, false)).unwrap();
        let exec = Flaky::new(1, StepError::RateLimited { retry_after_ms: Some(60_000) });
        let ctx = context();

        let result = coordinator()
            .execute_with_retry(&exec, "x", &ctx, &policy, TIMEOUT)
            .await;

        assert_eq!(result.duration_ms, 500);
        assert_eq!(ctx.attempts_for("x")[0].backoff_ms, Some(500));
    }
}
