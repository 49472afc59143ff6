//! Dependency graph planner: batch-wise topological ordering and cycle detection.
//!
//! Uses `petgraph` to model step dependencies as a directed graph. Kahn's
//! algorithm peels off the *entire* zero-in-degree frontier at each round so
//! every batch is maximal. Whatever cannot be peeled lies on or behind a
//! cycle; strongly connected components identify the exact cycle members.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use flowline_types::workflow::{ExecutionPlan, StepId, WorkflowDefinition};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;

/// Errors that prevent a plan from being computed at all.
///
/// Cycles are not errors at this level: they are reported in the plan
/// itself so callers can decide how to surface them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("step '{step_id}' references unknown step '{reference}'")]
    UnknownStep { step_id: StepId, reference: StepId },

    #[error("duplicate step id: '{0}'")]
    DuplicateStep(StepId),
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Compute the execution plan for a definition.
///
/// 1. Build a `DiGraph` with one node per step in declaration order and one
///    edge per distinct dependency (explicit edges plus `depends_on`).
/// 2. Repeatedly take every not-yet-emitted node with in-degree zero as one
///    batch, ordered by declaration index, and decrement its successors.
/// 3. Nodes left over sit on or downstream of a cycle. Members of non-trivial
///    strongly connected components (or self-loops) are the cycle nodes.
///
/// A plan with cycles carries no batches. O(V + E).
pub fn plan(def: &WorkflowDefinition) -> Result<ExecutionPlan, PlanError> {
    let mut graph = DiGraph::<&str, ()>::with_capacity(def.nodes.len(), def.edges.len());
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(def.nodes.len());
    for node in &def.nodes {
        let idx = graph.add_node(node.id.as_str());
        if index.insert(node.id.as_str(), idx).is_some() {
            return Err(PlanError::DuplicateStep(node.id.clone()));
        }
    }

    let mut dependencies: BTreeMap<StepId, BTreeSet<StepId>> = def
        .nodes
        .iter()
        .map(|n| (n.id.clone(), BTreeSet::new()))
        .collect();

    for edge in def.all_edges() {
        let from = *index.get(edge.from.as_str()).ok_or_else(|| PlanError::UnknownStep {
            step_id: edge.to.clone(),
            reference: edge.from.clone(),
        })?;
        let to = *index.get(edge.to.as_str()).ok_or_else(|| PlanError::UnknownStep {
            step_id: edge.from.clone(),
            reference: edge.to.clone(),
        })?;
        // update_edge keeps a single edge per ordered pair
        graph.update_edge(from, to, ());
        if let Some(deps) = dependencies.get_mut(&edge.to) {
            deps.insert(edge.from.clone());
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut emitted = vec![false; graph.node_count()];
    let mut execution_order: Vec<Vec<StepId>> = Vec::new();

    loop {
        // node_indices() iterates in insertion order, i.e. declaration order
        let batch: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|n| !emitted[n.index()] && in_degree[n.index()] == 0)
            .collect();
        if batch.is_empty() {
            break;
        }
        for &n in &batch {
            emitted[n.index()] = true;
            for succ in graph.neighbors_directed(n, Direction::Outgoing) {
                in_degree[succ.index()] = in_degree[succ.index()].saturating_sub(1);
            }
        }
        execution_order.push(batch.iter().map(|n| graph[*n].to_string()).collect());
    }

    if emitted.iter().all(|e| *e) {
        return Ok(ExecutionPlan {
            execution_order,
            dependencies,
            has_cycles: false,
            cycle_nodes: None,
        });
    }

    let cycle_nodes: BTreeSet<StepId> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(|n| graph[n].to_string())
        .collect();

    tracing::debug!(
        workflow = def.id.as_str(),
        cycle_nodes = ?cycle_nodes,
        "dependency cycle detected"
    );

    Ok(ExecutionPlan {
        execution_order: Vec::new(),
        dependencies,
        has_cycles: true,
        cycle_nodes: Some(cycle_nodes),
    })
}

/// Direct successors of every step, derived from a plan's dependency map.
pub fn successors(plan: &ExecutionPlan) -> BTreeMap<StepId, BTreeSet<StepId>> {
    let mut out: BTreeMap<StepId, BTreeSet<StepId>> = plan
        .dependencies
        .keys()
        .map(|id| (id.clone(), BTreeSet::new()))
        .collect();
    for (step, deps) in &plan.dependencies {
        for dep in deps {
            out.entry(dep.clone()).or_default().insert(step.clone());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
