//! AI invocation: renders a prompt template and calls the completion provider.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::llm::box_provider::BoxCompletionProvider;
use crate::workflow::step::{BoxFuture, StepError, StepExecutor, StepInvocation, StepOutput};

use super::parse_config;

pub const STEP_TYPE: &str = "ai";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AiConfig {
    /// Prompt with `{{ ... }}` placeholders.
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    /// Optional system preamble prepended to the rendered prompt.
    #[serde(default)]
    system: Option<String>,
}

/// Calls a `CompletionProvider` with a rendered prompt.
///
/// Output shape: `{ "content": "...", "model": "...", "usage": {...} }`.
pub struct AiExecutor {
    config: AiConfig,
    model: String,
    provider: Arc<BoxCompletionProvider>,
}

impl AiExecutor {
    pub fn from_config(
        config: &Map<String, Value>,
        provider: Arc<BoxCompletionProvider>,
        default_model: &str,
    ) -> Result<Self, String> {
        let config: AiConfig = parse_config(config)?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string());
        Ok(Self {
            config,
            model,
            provider,
        })
    }
}

impl StepExecutor for AiExecutor {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn validate_config(&self, _successors: &BTreeSet<String>) -> Result<(), String> {
        if self.config.prompt.trim().is_empty() {
            return Err("ai prompt must not be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("no model configured for ai step".to_string());
        }
        Ok(())
    }

    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            let ctx = &invocation.context;
            let rendered = ctx.resolve_template(&self.config.prompt);
            let prompt = match &self.config.system {
                Some(system) => format!("{}\n\n{rendered}", ctx.resolve_template(system)),
                None => rendered,
            };

            tracing::debug!(
                step_id = invocation.step_id.as_str(),
                provider = self.provider.name(),
                model = self.model.as_str(),
                attempt = invocation.attempt,
                "invoking completion provider"
            );

            let completion = tokio::select! {
                result = self.provider.complete(&prompt, &self.model) => result?,
                _ = ctx.cancellation_token().cancelled() => return Err(StepError::Cancelled),
            };

            Ok(StepOutput::Value(json!({
                "content": completion.content,
                "model": completion.model,
                "usage": {
                    "input_tokens": completion.usage.input_tokens,
                    "output_tokens": completion.usage.output_tokens,
                },
            })))
        })
    }
}

#[cfg(test)]
mod tests {
    use flowline_types::llm::{Completion, CompletionError};
    use serde_json::json;

    use super::*;
    use crate::llm::provider::CompletionProvider;
    use crate::workflow::handlers::test_support::{config, context, invocation, EchoProvider};

    struct Unauthorized;

    impl CompletionProvider for Unauthorized {
        fn name(&self) -> &str {
            "unauthorized"
        }

        async fn complete(&self, _: &str, _: &str) -> Result<Completion, CompletionError> {
            Err(CompletionError::AuthenticationFailed)
        }
    }

    #[tokio::test]
    async fn renders_prompt_and_uses_default_model() {
        let exec = AiExecutor::from_config(
            &config(json!({ "prompt": "Summarize {{ input.doc }} ({{ variables.tone }})" })),
            Arc::new(BoxCompletionProvider::new(EchoProvider)),
            "small",
        )
        .unwrap();
        let ctx = context(json!({ "doc": "the report" }));
        let out = exec.execute(&invocation(&ctx)).await.unwrap().into_value();
        assert_eq!(out["content"], json!("[small] Summarize the report (brief)"));
        assert_eq!(out["model"], json!("small"));
    }

    #[tokio::test]
    async fn explicit_model_wins() {
        let exec = AiExecutor::from_config(
            &config(json!({ "prompt": "hi", "model": "large" })),
            Arc::new(BoxCompletionProvider::new(EchoProvider)),
            "small",
        )
        .unwrap();
        let ctx = context(json!({}));
        let out = exec.execute(&invocation(&ctx)).await.unwrap().into_value();
        assert_eq!(out["model"], json!("large"));
    }

    #[tokio::test]
    async fn auth_failure_is_terminal() {
        let exec = AiExecutor::from_config(
            &config(json!({ "prompt": "hi" })),
            Arc::new(BoxCompletionProvider::new(Unauthorized)),
            "small",
        )
        .unwrap();
        let ctx = context(json!({}));
        let err = exec.execute(&invocation(&ctx)).await.unwrap_err();
        assert!(matches!(err, StepError::Permission(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn cancelled_run_interrupts_call() {
        struct Never;
        impl CompletionProvider for Never {
            fn name(&self) -> &str {
                "never"
            }
            async fn complete(&self, _: &str, _: &str) -> Result<Completion, CompletionError> {
                std::future::pending().await
            }
        }

        let exec = AiExecutor::from_config(
            &config(json!({ "prompt": "hi" })),
            Arc::new(BoxCompletionProvider::new(Never)),
            "small",
        )
        .unwrap();
        let ctx = context(json!({}));
        ctx.cancellation_token().cancel();
        let err = exec.execute(&invocation(&ctx)).await.unwrap_err();
        assert_eq!(err, StepError::Cancelled);
    }

    #[test]
    fn empty_prompt_fails_preflight() {
        let exec = AiExecutor::from_config(
            &config(json!({ "prompt": "" })),
            Arc::new(BoxCompletionProvider::new(EchoProvider)),
            "small",
        )
        .unwrap();
        assert!(exec.validate_config(&BTreeSet::new()).is_err());
    }
}
