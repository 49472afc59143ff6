//! Workflow definition and execution plan types.
//!
//! `WorkflowDefinition` is the frozen snapshot a run executes: a list of
//! `StepNode`s plus the `Edge`s between them. `ExecutionPlan` is the planner's
//! output, a sequence of batches that respects every declared dependency.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a step, unique within one workflow definition.
pub type StepId = String;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// Immutable snapshot of a workflow graph, taken at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier used by the storage collaborator.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default values seeded into the run's global variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
    /// Steps in declaration order. Declaration order fixes ordering within a batch.
    pub nodes: Vec<StepNode>,
    /// Explicit dependency edges.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    /// Look up a step by ID.
    pub fn node(&self, id: &str) -> Option<&StepNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All edges after folding each node's `depends_on` into AND edges.
    ///
    /// Explicit edges come first, in declaration order, followed by the
    /// implicit ones. A `depends_on` entry that duplicates an explicit edge
    /// between the same pair is not repeated.
    pub fn all_edges(&self) -> Vec<Edge> {
        let mut edges = self.edges.clone();
        for node in &self.nodes {
            for dep in &node.depends_on {
                let declared = self
                    .edges
                    .iter()
                    .any(|e| e.from == *dep && e.to == node.id);
                if !declared {
                    edges.push(Edge::and(dep.clone(), node.id.clone()));
                }
            }
        }
        edges
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
    /// Step ID, unique within the workflow.
    pub id: StepId,
    /// Registered executor type tag (e.g. `transform`, `ai`, `conditional`).
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Executor-specific configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Step IDs this step depends on (AND-joined).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<StepId>,
    /// Retry policy override for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicyConfig>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Directed dependency `from -> to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: StepId,
    pub to: StepId,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl Edge {
    pub fn and(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::And,
        }
    }

    pub fn or(from: impl Into<String>, to: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Or(group.into()),
        }
    }
}

/// How an edge participates in the target's readiness.
///
/// Serialized as a plain string: `"and"` or `"or:<group>"`, so YAML stays
/// flat (`kind: or:merge`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EdgeKind {
    /// Target waits for this predecessor to succeed.
    #[default]
    And,
    /// Target needs at least one member of the named group to succeed.
    Or(String),
}

impl EdgeKind {
    /// The OR-group name, if this is an OR edge.
    pub fn group(&self) -> Option<&str> {
        match self {
            EdgeKind::And => None,
            EdgeKind::Or(group) => Some(group),
        }
    }
}

impl TryFrom<String> for EdgeKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("and") {
            return Ok(EdgeKind::And);
        }
        match value.split_once(':') {
            Some((prefix, group)) if prefix.eq_ignore_ascii_case("or") => {
                let group = group.trim();
                if group.is_empty() {
                    Err("OR edge requires a group name (\"or:<group>\")".to_string())
                } else {
                    Ok(EdgeKind::Or(group.to_string()))
                }
            }
            _ => Err(format!(
                "invalid edge kind '{value}' (expected \"and\" or \"or:<group>\")"
            )),
        }
    }
}

impl From<EdgeKind> for String {
    fn from(kind: EdgeKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::And => write!(f, "and"),
            EdgeKind::Or(group) => write!(f, "or:{group}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Serializable retry policy. The engine turns this into a `RetryPolicy`
/// with an attached error classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt (default 100 ms).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (default 10 s).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays (default 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Add up to 10% uniform jitter to each delay (default true).
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Plan
// ---------------------------------------------------------------------------

/// Ordering of all steps into batches that respects every dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Batches in execution order. Members of a batch may run concurrently
    /// and are listed in declaration order.
    pub execution_order: Vec<Vec<StepId>>,
    /// Direct predecessors of every step.
    pub dependencies: BTreeMap<StepId, BTreeSet<StepId>>,
    /// Whether any dependency cycle was found.
    pub has_cycles: bool,
    /// Steps that lie on a cycle, when `has_cycles` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_nodes: Option<BTreeSet<StepId>>,
}

impl ExecutionPlan {
    /// Number of batches.
    pub fn batch_count(&self) -> usize {
        self.execution_order.len()
    }

    /// Number of steps placed into batches.
    pub fn step_count(&self) -> usize {
        self.execution_order.iter().map(Vec::len).sum()
    }

    /// Index of the batch containing `step_id`.
    pub fn batch_of(&self, step_id: &str) -> Option<usize> {
        self.execution_order
            .iter()
            .position(|batch| batch.iter().any(|id| id == step_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
