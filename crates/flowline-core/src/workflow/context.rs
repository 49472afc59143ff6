//! Per-run execution context: step outputs, variables, retry counters, and
//! attempt history.
//!
//! One `ExecutionContext` exists per run. It is shared with every step task
//! behind an `Arc` and mutated only through its methods, so concurrent steps
//! in a batch can record results without a global lock. Step outputs are
//! write-once: a key is inserted when its step reaches a terminal state and
//! never replaced or removed for the rest of the run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flowline_types::run::{AttemptRecord, StepStatus};
use flowline_types::workflow::{StepId, WorkflowDefinition};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("output for step '{0}' was already recorded")]
    OutputAlreadyRecorded(StepId),

    #[error("step '{0}' is not part of this run")]
    UnknownStep(StepId),

    #[error("step '{step_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        step_id: StepId,
        from: StepStatus,
        to: StepStatus,
    },
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable state owned by a single run.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    workflow_id: String,
    workflow_name: String,
    input: Value,
    step_outputs: DashMap<StepId, Value>,
    statuses: DashMap<StepId, StepStatus>,
    variables: DashMap<String, Value>,
    retry_counts: DashMap<StepId, u32>,
    /// Targets a conditional step did not select, keyed by the conditional step.
    rejected_branches: DashMap<StepId, BTreeSet<StepId>>,
    attempts: Mutex<Vec<AttemptRecord>>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Create the context for a run. Every step starts `Pending` and the
    /// definition's `variables` seed the global variables.
    pub fn new(
        run_id: Uuid,
        definition: &WorkflowDefinition,
        input: Value,
        cancel: CancellationToken,
    ) -> Self {
        let statuses = definition
            .nodes
            .iter()
            .map(|n| (n.id.clone(), StepStatus::Pending))
            .collect();
        let variables = definition
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            run_id,
            workflow_id: definition.id.clone(),
            workflow_name: definition.name.clone(),
            input,
            step_outputs: DashMap::new(),
            statuses,
            variables,
            retry_counts: DashMap::new(),
            rejected_branches: DashMap::new(),
            attempts: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Run input, exposed to templates and expressions as `input`.
    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -----------------------------------------------------------------------
    // Step outputs
    // -----------------------------------------------------------------------

    /// Record the output of a step that reached a terminal state.
    ///
    /// Outputs larger than `MAX_STEP_OUTPUT_SIZE` are replaced with a
    /// truncation marker. A second write for the same step is rejected.
    pub fn set_step_output(&self, step_id: &str, output: Value) -> Result<(), ContextError> {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        let output = if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_original_size": size,
            })
        } else {
            output
        };

        match self.step_outputs.entry(step_id.to_string()) {
            Entry::Occupied(_) => Err(ContextError::OutputAlreadyRecorded(step_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(output);
                Ok(())
            }
        }
    }

    pub fn step_output(&self, step_id: &str) -> Option<Value> {
        self.step_outputs.get(step_id).map(|v| v.value().clone())
    }

    /// Snapshot of all recorded outputs.
    pub fn step_outputs(&self) -> BTreeMap<StepId, Value> {
        self.step_outputs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Step status
    // -----------------------------------------------------------------------

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.statuses.get(step_id).map(|s| *s)
    }

    /// Move a step to `next`, enforcing the step state machine.
    pub fn transition(&self, step_id: &str, next: StepStatus) -> Result<(), ContextError> {
        let mut status = self
            .statuses
            .get_mut(step_id)
            .ok_or_else(|| ContextError::UnknownStep(step_id.to_string()))?;
        if !status.can_transition_to(next) {
            return Err(ContextError::InvalidTransition {
                step_id: step_id.to_string(),
                from: *status,
                to: next,
            });
        }
        *status = next;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).map(|v| v.value().clone())
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    // -----------------------------------------------------------------------
    // Branch selection
    // -----------------------------------------------------------------------

    /// Mark the edges from `step_id` to `targets` as inactive.
    pub fn reject_branches(&self, step_id: &str, targets: impl IntoIterator<Item = StepId>) {
        self.rejected_branches
            .entry(step_id.to_string())
            .or_default()
            .extend(targets);
    }

    /// Whether the edge `from -> to` is still active.
    pub fn edge_active(&self, from: &str, to: &str) -> bool {
        self.rejected_branches
            .get(from)
            .is_none_or(|rejected| !rejected.contains(to))
    }

    // -----------------------------------------------------------------------
    // Attempts, retries, error history
    // -----------------------------------------------------------------------

    /// Append an attempt and update the step's retry counter.
    pub fn record_attempt(&self, record: AttemptRecord) {
        self.retry_counts
            .insert(record.step_id.clone(), record.attempt.saturating_sub(1));
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Retries consumed by a step (attempts beyond the first).
    pub fn retry_count(&self, step_id: &str) -> u32 {
        self.retry_counts.get(step_id).map(|c| *c).unwrap_or(0)
    }

    /// Every attempt for a step, in order.
    pub fn attempts_for(&self, step_id: &str) -> Vec<AttemptRecord> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.step_id == step_id)
            .cloned()
            .collect()
    }

    /// Failed attempts across the whole run.
    pub fn error_history(&self) -> Vec<AttemptRecord> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| !a.succeeded)
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Templates and expressions
    // -----------------------------------------------------------------------

    /// Build the JSON object that expressions evaluate against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "steps": { "<step_id>": { "output": <value> }, ... },
    ///   "variables": { ... },
    ///   "input": <run input>,
    ///   "workflow": { "id": "...", "name": "...", "run_id": "..." }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        let mut steps = Map::new();
        for entry in self.step_outputs.iter() {
            steps.insert(entry.key().clone(), json!({ "output": entry.value() }));
        }
        let variables: Map<String, Value> = self
            .variables
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        json!({
            "steps": steps,
            "variables": variables,
            "input": self.input,
            "workflow": {
                "id": self.workflow_id,
                "name": self.workflow_name,
                "run_id": self.run_id.to_string(),
            }
        })
    }

    /// Resolve `{{ ... }}` placeholders in a string.
    ///
    /// Supports:
    /// - `{{ steps.<step_id>.output }}`, optionally followed by a field path
    /// - `{{ variables.<name> }}`
    /// - `{{ input.<field> }}`, or `{{ input }}` for the whole input
    ///
    /// Unknown references are left as-is (not an error).
    pub fn resolve_template(&self, template: &str) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                result.push_str(&rest[start..]);
                return result;
            };
            let expr = after_open[..end].trim();
            match self.lookup(expr) {
                Some(value) => result.push_str(&value_to_string(&value)),
                None => result.push_str(&rest[start..start + 2 + end + 2]),
            }
            rest = &after_open[end + 2..];
        }

        result.push_str(rest);
        result
    }

    /// Look up a dotted path (`steps.x.output.field`, `variables.y`, `input.z`).
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let root = match parts.next()? {
            "steps" => {
                let step_id = parts.next()?;
                if parts.next()? != "output" {
                    return None;
                }
                self.step_output(step_id)?
            }
            "variables" => self.variable(parts.next()?)?,
            "input" => self.input.clone(),
            _ => return None,
        };

        let mut current = root;
        for field in parts {
            current = match current {
                Value::Object(mut map) => map.remove(field)?,
                Value::Array(mut items) => {
                    let idx: usize = field.parse().ok()?;
                    if idx >= items.len() {
                        return None;
                    }
                    items.swap_remove(idx)
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a JSON value to a display string for template resolution.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
