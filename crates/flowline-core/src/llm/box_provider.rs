//! BoxCompletionProvider -- object-safe dynamic dispatch wrapper for CompletionProvider.
//!
//! 1. Define an object-safe `CompletionProviderDyn` trait with boxed futures
//! 2. Blanket-impl `CompletionProviderDyn` for all `T: CompletionProvider`
//! 3. `BoxCompletionProvider` wraps `Box<dyn CompletionProviderDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use flowline_types::llm::{Completion, CompletionError};

use super::provider::CompletionProvider;

/// Object-safe version of [`CompletionProvider`] with boxed futures.
pub trait CompletionProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
        model: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, CompletionError>> + Send + 'a>>;
}

impl<T: CompletionProvider> CompletionProviderDyn for T {
    fn name(&self) -> &str {
        CompletionProvider::name(self)
    }

    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
        model: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Completion, CompletionError>> + Send + 'a>> {
        Box::pin(self.complete(prompt, model))
    }
}

/// Type-erased completion provider, chosen at runtime.
pub struct BoxCompletionProvider {
    inner: Box<dyn CompletionProviderDyn + Send + Sync>,
}

impl BoxCompletionProvider {
    /// Wrap a concrete `CompletionProvider` in a type-erased box.
    pub fn new<T: CompletionProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn complete(&self, prompt: &str, model: &str) -> Result<Completion, CompletionError> {
        self.inner.complete_boxed(prompt, model).await
    }
}

impl std::fmt::Debug for BoxCompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCompletionProvider")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_types::llm::TokenUsage;

    struct Echo;

    impl CompletionProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, prompt: &str, model: &str) -> Result<Completion, CompletionError> {
            Ok(Completion {
                content: prompt.to_uppercase(),
                model: model.to_string(),
                usage: TokenUsage::default(),
            })
        }
    }

    #[tokio::test]
    async fn boxed_provider_delegates() {
        let provider = BoxCompletionProvider::new(Echo);
        assert_eq!(provider.name(), "echo");
        let completion = provider.complete("hi", "tiny").await.unwrap();
        assert_eq!(completion.content, "HI");
        assert_eq!(completion.model, "tiny");
    }
}
