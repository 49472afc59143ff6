//! The step executor capability and its error classification.
//!
//! Every step type implements `StepExecutor`. Executors are built from a
//! step's config by the `ExecutorRegistry`, validated once during pre-flight,
//! then invoked (possibly several times, under the retry coordinator) with a
//! `StepInvocation` that carries the run's shared `ExecutionContext`.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use flowline_types::llm::CompletionError;
use flowline_types::run::FailureCategory;
use flowline_types::workflow::StepId;
use serde_json::Value;

use super::context::ExecutionContext;

/// Boxed future returned by object-safe executor methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// StepInvocation / StepOutput
// ---------------------------------------------------------------------------

/// Everything an executor receives for one attempt.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub step_id: StepId,
    /// 1-based attempt index.
    pub attempt: u32,
    pub context: Arc<ExecutionContext>,
}

/// Output produced by a successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// A plain value stored as the step's output.
    Value(Value),
    /// Conditional result: edges to `rejected` targets become inactive.
    Branch {
        value: Value,
        selected: Vec<StepId>,
        rejected: Vec<StepId>,
    },
}

impl StepOutput {
    pub fn value(&self) -> &Value {
        match self {
            StepOutput::Value(v) => v,
            StepOutput::Branch { value, .. } => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            StepOutput::Value(v) => v,
            StepOutput::Branch { value, .. } => value,
        }
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure of a single attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// Network or other transient failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The attempt exceeded its timeout.
    #[error("attempt timed out after {0}ms")]
    Timeout(u64),

    /// An upstream service answered with an HTTP status.
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// An upstream service asked us to slow down, possibly saying for how long.
    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Input or output failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Authentication or authorization was refused.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The step's configuration cannot work at run time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The run was cancelled while the step was active.
    #[error("cancelled")]
    Cancelled,
}

impl StepError {
    /// Default classification: network, timeout, 5xx and 429 are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Transient(_) | StepError::Timeout(_) | StepError::RateLimited { .. } => true,
            StepError::Upstream { status, .. } => *status >= 500 || *status == 429,
            StepError::Validation(_)
            | StepError::Permission(_)
            | StepError::Configuration(_)
            | StepError::Cancelled => false,
        }
    }

    /// Minimum wait the upstream asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StepError::RateLimited {
                retry_after_ms: Some(ms),
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl From<CompletionError> for StepError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Transport(msg) => StepError::Transient(msg),
            CompletionError::Timeout => StepError::Transient("completion request timed out".into()),
            CompletionError::RateLimited { retry_after_ms } => StepError::RateLimited { retry_after_ms },
            CompletionError::Status { status, body } => StepError::Upstream {
                status,
                message: body,
            },
            CompletionError::AuthenticationFailed => StepError::Permission(err.to_string()),
            CompletionError::Deserialization(msg) => StepError::Validation(msg),
            CompletionError::InvalidRequest(msg) => StepError::Configuration(msg),
        }
    }
}

/// Category reported for a failure that ended a step.
pub fn failure_category(err: &StepError, retryable: bool) -> FailureCategory {
    match err {
        StepError::Cancelled => FailureCategory::Cancelled,
        StepError::Configuration(_) => FailureCategory::Configuration,
        _ if retryable => FailureCategory::Transient,
        _ => FailureCategory::Terminal,
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// A constructed, configured step handler.
///
/// Object-safe (boxed futures) so the registry can hand out
/// `Arc<dyn StepExecutor>` for any registered type.
pub trait StepExecutor: Send + Sync {
    /// The type tag this executor was registered under.
    fn step_type(&self) -> &str;

    /// Pre-flight check with zero side effects.
    ///
    /// `successors` are the step's direct successors in the graph.
    fn validate_config(&self, successors: &BTreeSet<StepId>) -> Result<(), String>;

    /// Run one attempt.
    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification() {
        assert!(StepError::Transient("reset".into()).is_retryable());
        assert!(StepError::Timeout(50).is_retryable());
        assert!(StepError::Upstream { status: 503, message: String::new() }.is_retryable());
        assert!(StepError::Upstream { status: 429, message: String::new() }.is_retryable());
        assert!(!StepError::Upstream { status: 404, message: String::new() }.is_retryable());
        assert!(!StepError::Validation("bad".into()).is_retryable());
        assert!(!StepError::Permission("no".into()).is_retryable());
        assert!(!StepError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn completion_errors_map_to_step_errors() {
        assert!(StepError::from(CompletionError::Transport("dns".into())).is_retryable());
        let limited = StepError::from(CompletionError::RateLimited { retry_after_ms: Some(5) });
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(std::time::Duration::from_millis(5)));
        assert_eq!(
            StepError::from(CompletionError::RateLimited { retry_after_ms: None }).retry_after(),
            None
        );
        assert!(matches!(
            StepError::from(CompletionError::AuthenticationFailed),
            StepError::Permission(_)
        ));
        assert!(!StepError::from(CompletionError::Status {
            status: 400,
            body: "bad".into()
        })
        .is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(
            failure_category(&StepError::Validation("x".into()), false),
            FailureCategory::Terminal
        );
        assert_eq!(
            failure_category(&StepError::Transient("x".into()), true),
            FailureCategory::Transient
        );
        assert_eq!(
            failure_category(&StepError::Cancelled, false),
            FailureCategory::Cancelled
        );
    }

    #[test]
    fn output_value_accessors() {
        let out = StepOutput::Branch {
            value: json!(true),
            selected: vec!["a".into()],
            rejected: vec!["b".into()],
        };
        assert_eq!(out.value(), &json!(true));
        assert_eq!(out.into_value(), json!(true));
    }
}
