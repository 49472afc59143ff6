//! Input collection: pulls named fields out of the run input.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::workflow::step::{BoxFuture, StepError, StepExecutor, StepInvocation, StepOutput};

use super::parse_config;

pub const STEP_TYPE: &str = "input";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputConfig {
    /// Fields that must be present in the input (or in `defaults`).
    #[serde(default)]
    fields: Vec<String>,
    /// Values used when the input lacks a field.
    #[serde(default)]
    defaults: Map<String, Value>,
}

/// Collects run input into the step's output.
///
/// With `fields`, the output is an object holding exactly those fields.
/// Without, the whole input object is passed through with `defaults` filled in.
#[derive(Debug)]
pub struct InputExecutor {
    config: InputConfig,
}

impl InputExecutor {
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, String> {
        Ok(Self {
            config: parse_config(config)?,
        })
    }

    fn collect(&self, input: &Value) -> Result<Value, StepError> {
        let lookup = |field: &str| {
            input
                .get(field)
                .filter(|v| !v.is_null())
                .or_else(|| self.config.defaults.get(field))
                .cloned()
        };

        if self.config.fields.is_empty() {
            let mut out = input.as_object().cloned().unwrap_or_default();
            for (key, value) in &self.config.defaults {
                out.entry(key.clone()).or_insert_with(|| value.clone());
            }
            return Ok(Value::Object(out));
        }

        let mut out = Map::new();
        let mut missing = Vec::new();
        for field in &self.config.fields {
            match lookup(field) {
                Some(value) => {
                    out.insert(field.clone(), value);
                }
                None => missing.push(field.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(StepError::Validation(format!(
                "missing required input field(s): {}",
                missing.join(", ")
            )));
        }
        Ok(Value::Object(out))
    }
}

impl StepExecutor for InputExecutor {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn validate_config(&self, _successors: &BTreeSet<String>) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for field in &self.config.fields {
            if field.trim().is_empty() {
                return Err("input field names must not be empty".to_string());
            }
            if !seen.insert(field.as_str()) {
                return Err(format!("input field '{field}' listed twice"));
            }
        }
        Ok(())
    }

    fn execute<'a>(&'a self, invocation: &'a StepInvocation) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            self.collect(invocation.context.input())
                .map(StepOutput::Value)
        })
    }
}
