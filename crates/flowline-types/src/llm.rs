//! Completion collaborator types used by AI invocation steps.

use serde::{Deserialize, Serialize};

/// Response from a completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    pub usage: TokenUsage,
}

/// Token accounting for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Errors from a completion provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out")]
    Timeout,
}

impl CompletionError {
    /// Network failures, timeouts, 5xx and 429 are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Transport(_)
            | CompletionError::RateLimited { .. }
            | CompletionError::Timeout => true,
            CompletionError::Status { status, .. } => *status >= 500 || *status == 429,
            CompletionError::AuthenticationFailed
            | CompletionError::Deserialization(_)
            | CompletionError::InvalidRequest(_) => false,
        }
    }
}
