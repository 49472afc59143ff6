//! Data transform: evaluates a JEXL expression against the run context.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::workflow::context::ExecutionContext;
use crate::workflow::expression::{ExpressionError, WorkflowEvaluator};
use crate::workflow::step::{BoxFuture, StepError, StepExecutor, StepInvocation, StepOutput};

use super::parse_config;

pub const STEP_TYPE: &str = "transform";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransformConfig {
    /// JEXL expression over `{steps, variables, input, workflow}`.
    expression: String,
    /// Also store the result as a global variable under this name.
    #[serde(default)]
    assign_to: Option<String>,
}

#[derive(Debug)]
pub struct TransformExecutor {
    config: TransformConfig,
}

impl TransformExecutor {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            config: parse_config(config)?,
        })
    }
}

/// Evaluate outside any async block: the evaluator is not `Send`.
fn evaluate(expression: &str, ctx: &ExecutionContext) -> Result<Value, ExpressionError> {
    WorkflowEvaluator::new().evaluate_in_run(expression, ctx)
}

impl StepExecutor for TransformExecutor {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn validate_config(&self, _successors: &BTreeSet<String>) -> Result<(), String> {
        if self.config.expression.trim().is_empty() {
            return Err("transform expression must not be empty".to_string());
        }
        if let Some(name) = &self.config.assign_to {
            if name.trim().is_empty() {
                return Err("assign_to must not be empty".to_string());
            }
        }
        Ok(())
    }

    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            let ctx = &invocation.context;
            let value = evaluate(&self.config.expression, ctx)
                .map_err(|e| StepError::Validation(e.to_string()))?;
            if let Some(name) = &self.config.assign_to {
                ctx.set_variable(name.clone(), value.clone());
            }
            Ok(StepOutput::Value(value))
        })
    }
}
