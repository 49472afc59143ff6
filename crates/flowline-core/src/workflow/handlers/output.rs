//! Output: assembles the run's final value from step outputs or a template.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::workflow::step::{BoxFuture, StepError, StepExecutor, StepInvocation, StepOutput};

use super::parse_config;

pub const STEP_TYPE: &str = "output";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputConfig {
    /// Render this template into a string output.
    #[serde(default)]
    template: Option<String>,
    /// Collect these steps' outputs into an object keyed by step id.
    #[serde(default)]
    sources: Vec<String>,
}

/// Produces a final value.
///
/// - `template`: the rendered string
/// - `sources`: `{ "<step_id>": <output> }` for each source that produced one
/// - neither: every recorded step output
#[derive(Debug)]
pub struct OutputExecutor {
    config: OutputConfig,
}

impl OutputExecutor {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            config: parse_config(config)?,
        })
    }
}

impl StepExecutor for OutputExecutor {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn validate_config(&self, _successors: &BTreeSet<String>) -> Result<(), String> {
        if self.config.template.is_some() && !self.config.sources.is_empty() {
            return Err("output step takes either 'template' or 'sources', not both".to_string());
        }
        Ok(())
    }

    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            let ctx = &invocation.context;
            if let Some(template) = &self.config.template {
                return Ok(StepOutput::Value(Value::String(ctx.resolve_template(template))));
            }

            let collected: Map<String, Value> = if self.config.sources.is_empty() {
                ctx.step_outputs().into_iter().collect()
            } else {
                // Skipped branches have no output; an OR-join output only
                // sees the branch that ran.
                self.config
                    .sources
                    .iter()
                    .filter_map(|id| ctx.step_output(id).map(|v| (id.clone(), v)))
                    .collect()
            };
            Ok(StepOutput::Value(Value::Object(collected)))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::handlers::test_support::{config, context, invocation};

    #[tokio::test]
    async fn template_output() {
        let ctx = context(json!({ "who": "team" }));
        ctx.set_step_output("collect", json!("done")).unwrap();
        let exec = OutputExecutor::from_config(&config(json!({
            "template": "Hi {{ input.who }}: {{ steps.collect.output }}"
        })))
        .unwrap();
        let out = exec.execute(&invocation(&ctx)).await.unwrap();
        assert_eq!(out.into_value(), json!("Hi team: done"));
    }

    #[tokio::test]
    async fn sources_skip_missing_outputs() {
        let ctx = context(json!({}));
        ctx.set_step_output("collect", json!(1)).unwrap();
        let exec = OutputExecutor::from_config(&config(json!({
            "sources": ["collect", "never_ran"]
        })))
        .unwrap();
        let out = exec.execute(&invocation(&ctx)).await.unwrap();
        assert_eq!(out.into_value(), json!({ "collect": 1 }));
    }

    #[tokio::test]
    async fn default_collects_everything() {
        let ctx = context(json!({}));
        ctx.set_step_output("collect", json!(1)).unwrap();
        let exec = OutputExecutor::from_config(&Map::new()).unwrap();
        let out = exec.execute(&invocation(&ctx)).await.unwrap();
        assert_eq!(out.into_value(), json!({ "collect": 1 }));
    }

    #[test]
    fn template_and_sources_conflict() {
        let exec = OutputExecutor::from_config(&config(json!({
            "template": "x",
            "sources": ["a"]
        })))
        .unwrap();
        assert!(exec.validate_config(&BTreeSet::new()).is_err());
    }
}
