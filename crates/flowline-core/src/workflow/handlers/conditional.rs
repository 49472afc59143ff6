//! Conditional branching: evaluates a condition and activates one branch.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::workflow::context::ExecutionContext;
use crate::workflow::expression::{truthy, ExpressionError, WorkflowEvaluator};
use crate::workflow::step::{BoxFuture, StepError, StepExecutor, StepInvocation, StepOutput};

use super::parse_config;

pub const STEP_TYPE: &str = "conditional";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionalConfig {
    /// JEXL condition, coerced with truthiness.
    condition: String,
    /// Successors activated when the condition holds.
    #[serde(default)]
    when_true: Vec<String>,
    /// Successors activated otherwise.
    #[serde(default)]
    when_false: Vec<String>,
}

/// Selects between two sets of direct successors.
///
/// Edges to the unselected set become inactive and those successors are
/// skipped (unless an OR-join lets another branch satisfy them). Successors
/// listed in neither set are unaffected.
#[derive(Debug)]
pub struct ConditionalExecutor {
    config: ConditionalConfig,
}

impl ConditionalExecutor {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            config: parse_config(config)?,
        })
    }
}

fn evaluate(condition: &str, ctx: &ExecutionContext) -> Result<bool, ExpressionError> {
    WorkflowEvaluator::new()
        .evaluate_in_run(condition, ctx)
        .map(|v| truthy(&v))
}

impl StepExecutor for ConditionalExecutor {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn validate_config(&self, successors: &BTreeSet<String>) -> Result<(), String> {
        if self.config.condition.trim().is_empty() {
            return Err("condition must not be empty".to_string());
        }
        for target in self.config.when_true.iter().chain(&self.config.when_false) {
            if !successors.contains(target) {
                return Err(format!(
                    "branch target '{target}' is not a direct successor of this step"
                ));
            }
        }
        if let Some(both) = self
            .config
            .when_true
            .iter()
            .find(|t| self.config.when_false.contains(t))
        {
            return Err(format!("'{both}' is listed in both when_true and when_false"));
        }
        Ok(())
    }

    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            let result = evaluate(&self.config.condition, &invocation.context)
                .map_err(|e| StepError::Validation(e.to_string()))?;
            let (selected, rejected) = if result {
                (self.config.when_true.clone(), self.config.when_false.clone())
            } else {
                (self.config.when_false.clone(), self.config.when_true.clone())
            };

            tracing::debug!(
                step_id = invocation.step_id.as_str(),
                result,
                selected = ?selected,
                "condition evaluated"
            );

            Ok(StepOutput::Branch {
                value: json!({ "result": result, "selected": selected }),
                selected,
                rejected,
            })
        })
    }
}
