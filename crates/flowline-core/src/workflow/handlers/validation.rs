//! Validation: checks a payload against a schema via the `SchemaValidator` port.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::validation::SchemaValidator;
use crate::workflow::step::{BoxFuture, StepError, StepExecutor, StepInvocation, StepOutput};

use super::parse_config;

pub const STEP_TYPE: &str = "validation";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidationConfig {
    schema: Value,
    /// Step whose output is validated. Defaults to the run input.
    #[serde(default)]
    source: Option<String>,
}

/// Validates a payload and passes it through unchanged when valid.
///
/// An invalid payload is a terminal failure: retrying cannot change it.
pub struct ValidationExecutor {
    config: ValidationConfig,
    validator: Arc<dyn SchemaValidator>,
}

impl ValidationExecutor {
    pub fn from_config(
        config: &Map<String, Value>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Result<Self, String> {
        Ok(Self {
            config: parse_config(config)?,
            validator,
        })
    }
}

impl StepExecutor for ValidationExecutor {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn validate_config(&self, _successors: &BTreeSet<String>) -> Result<(), String> {
        self.validator
            .check_schema(&self.config.schema)
            .map_err(|e| e.to_string())
    }

    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            let ctx = &invocation.context;
            let payload = match &self.config.source {
                Some(step_id) => ctx.step_output(step_id).ok_or_else(|| {
                    StepError::Validation(format!("no output recorded for source step '{step_id}'"))
                })?,
                None => ctx.input().clone(),
            };

            let report = self
                .validator
                .validate(&self.config.schema, &payload)
                .map_err(|e| StepError::Configuration(e.to_string()))?;
            if !report.valid {
                return Err(StepError::Validation(report.errors.join("; ")));
            }
            Ok(StepOutput::Value(payload))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::handlers::test_support::{config, context, invocation, RequiredKeysValidator};

    fn executor(cfg: Value) -> ValidationExecutor {
        ValidationExecutor::from_config(&config(cfg), Arc::new(RequiredKeysValidator)).unwrap()
    }

    #[tokio::test]
    async fn valid_payload_passes_through() {
        let exec = executor(json!({ "schema": { "required": ["title"] }, "source": "collect" }));
        let ctx = context(json!({}));
        ctx.set_step_output("collect", json!({ "title": "x" })).unwrap();
        let out = exec.execute(&invocation(&ctx)).await.unwrap();
        assert_eq!(out.into_value(), json!({ "title": "x" }));
    }

    #[tokio::test]
    async fn invalid_payload_is_terminal() {
        let exec = executor(json!({ "schema": { "required": ["title"] } }));
        let ctx = context(json!({ "body": "no title" }));
        let err = exec.execute(&invocation(&ctx)).await.unwrap_err();
        assert!(matches!(err, StepError::Validation(ref m) if m.contains("title")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn preflight_checks_schema() {
        let exec = executor(json!({ "schema": "not a schema" }));
        assert!(exec.validate_config(&BTreeSet::new()).is_err());
    }
}
