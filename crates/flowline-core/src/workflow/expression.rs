//! JEXL expression evaluation for transform and conditional steps.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of standard transforms.
//! Run data is always passed as the evaluation context, never spliced into
//! the expression string.
//!
//! The evaluator holds boxed transform closures and is not `Send`, so it is
//! created where needed inside synchronous code rather than stored in
//! executors that cross task boundaries.

use serde_json::{json, Value};

use super::context::ExecutionContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms registered.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("keys", |args: &[Value]| {
                let keys: Vec<String> = match args.first() {
                    Some(Value::Object(o)) => o.keys().cloned().collect(),
                    _ => Vec::new(),
                };
                Ok(json!(keys))
            })
            .with_transform("default", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                if val.is_null() {
                    Ok(args.get(1).cloned().unwrap_or(Value::Null))
                } else {
                    Ok(val)
                }
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression and coerce the result with JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, context)
            .map(|v| truthy(&v))
    }

    /// Evaluate against a run's `{steps, variables, input, workflow}` view.
    pub fn evaluate_in_run(
        &self,
        expression: &str,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExpressionError> {
        self.evaluate_value(expression, &ctx.to_expression_context())
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_types::workflow::WorkflowDefinition;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new()
    }

    #[test]
    fn dot_notation_and_comparison() {
        let ctx = json!({ "input": { "user": { "name": "Ada" } } });
        let eval = evaluator();
        assert_eq!(
            eval.evaluate_value("input.user.name", &ctx).unwrap(),
            json!("Ada")
        );
        assert!(eval.evaluate_bool("input.user.name == 'Ada'", &ctx).unwrap());
    }

    #[test]
    fn transforms() {
        let ctx = json!({ "s": "  Hello  ", "items": [1, 2, 3], "obj": { "a": 1 } });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("s|trim|lower", &ctx).unwrap(), json!("hello"));
        assert!(eval.evaluate_bool("items|length > 2", &ctx).unwrap());
        assert!(eval.evaluate_bool("s|contains('ell')", &ctx).unwrap());
        assert_eq!(eval.evaluate_value("obj|keys", &ctx).unwrap(), json!(["a"]));
        assert_eq!(
            eval.evaluate_value("missing|default('fallback')", &ctx).unwrap(),
            json!("fallback")
        );
    }

    #[test]
    fn truthiness() {
        assert!(truthy(&json!("x")));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!([])));
        assert!(!truthy(&Value::Null));
    }

    #[test]
    fn rejects_non_object_context() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate_value("1", &json!([1])),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn syntax_error_is_eval_failure() {
        let eval = evaluator();
        assert!(matches!(
            eval.evaluate_value("a ==", &json!({})),
            Err(ExpressionError::EvalFailed(_))
        ));
    }

    #[test]
    fn evaluates_against_run_context() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "variables": { "threshold": 2 },
            "nodes": [ { "id": "gather", "type": "input" } ]
        }))
        .unwrap();
        let ctx = ExecutionContext::new(
            Uuid::now_v7(),
            &def,
            json!({ "mode": "fast" }),
            CancellationToken::new(),
        );
        ctx.set_step_output("gather", json!(["a", "b", "c"])).unwrap();

        let eval = evaluator();
        let result = eval
            .evaluate_in_run(
                "steps.gather.output|length > variables.threshold && input.mode == 'fast'",
                &ctx,
            )
            .unwrap();
        assert_eq!(result, json!(true));
    }
}
