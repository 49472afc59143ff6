//! Readiness predicate over incoming edges.
//!
//! A step's fate is decided purely from its incoming edges: the kind of each
//! edge, the status of the predecessor, and whether a conditional predecessor
//! left the edge active. AND edges must all be satisfied; each OR-group needs
//! at least one satisfied member. A dead AND edge, or an OR-group whose members
//! are all dead, skips the step.

use std::collections::BTreeMap;

use flowline_types::run::StepStatus;
use flowline_types::workflow::EdgeKind;

/// An incoming edge as seen at readiness time.
#[derive(Debug, Clone, Copy)]
pub struct IncomingEdge<'a> {
    pub from: &'a str,
    pub kind: &'a EdgeKind,
    /// Current status of the predecessor.
    pub status: StepStatus,
    /// False when a conditional predecessor did not select this edge.
    pub active: bool,
}

/// State of a single edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    /// Predecessor succeeded and the edge is active.
    Satisfied,
    /// Predecessor failed, was skipped, or deselected this edge.
    Dead,
    /// Predecessor has not reached a terminal state.
    Pending,
}

impl IncomingEdge<'_> {
    pub fn state(&self) -> EdgeState {
        match self.status {
            StepStatus::Succeeded if self.active => EdgeState::Satisfied,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped => EdgeState::Dead,
            StepStatus::Pending | StepStatus::Ready | StepStatus::Running => EdgeState::Pending,
        }
    }
}

/// Outcome of the readiness predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The step can never run; carries a human-readable reason.
    Skip(String),
    /// Some predecessor has not finished yet.
    Waiting,
}

/// Decide whether a step with the given incoming edges may run.
pub fn evaluate(incoming: &[IncomingEdge<'_>]) -> Readiness {
    let mut waiting = false;
    let mut groups: BTreeMap<&str, Vec<EdgeState>> = BTreeMap::new();

    for edge in incoming {
        let state = edge.state();
        match edge.kind {
            EdgeKind::And => match state {
                EdgeState::Satisfied => {}
                EdgeState::Dead => return Readiness::Skip(dead_reason(edge)),
                EdgeState::Pending => waiting = true,
            },
            EdgeKind::Or(group) => groups.entry(group.as_str()).or_default().push(state),
        }
    }

    for (group, states) in &groups {
        if states.contains(&EdgeState::Satisfied) {
            continue;
        }
        if states.iter().all(|s| *s == EdgeState::Dead) {
            return Readiness::Skip(format!("no branch of OR-group '{group}' completed"));
        }
        waiting = true;
    }

    if waiting {
        Readiness::Waiting
    } else {
        Readiness::Ready
    }
}

fn dead_reason(edge: &IncomingEdge<'_>) -> String {
    match edge.status {
        StepStatus::Failed => format!("upstream step '{}' failed", edge.from),
        StepStatus::Skipped => format!("upstream step '{}' was skipped", edge.from),
        _ => format!("branch from '{}' not selected", edge.from),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
