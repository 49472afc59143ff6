//! CompletionProvider trait definition.

use flowline_types::llm::{Completion, CompletionError};

/// Trait for text completion backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). Implementations
/// live in flowline-infra (e.g. `HttpCompletionProvider`).
pub trait CompletionProvider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Complete `prompt` with `model` and return the full response.
    fn complete(
        &self,
        prompt: &str,
        model: &str,
    ) -> impl std::future::Future<Output = Result<Completion, CompletionError>> + Send;
}
