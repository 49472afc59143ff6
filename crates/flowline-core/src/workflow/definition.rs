//! Workflow definition parsing, structural validation, and content hashing.
//!
//! Definitions are accepted as YAML or JSON. Structural validation collects
//! every problem it finds instead of stopping at the first, so a single
//! `ConfigurationError` can report all of them before any step runs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use flowline_types::workflow::{EdgeKind, RetryPolicyConfig, StepId, WorkflowDefinition};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A single pre-flight problem, optionally attributed to a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub step_id: Option<StepId>,
    pub message: String,
}

impl ConfigIssue {
    pub fn workflow(message: impl Into<String>) -> Self {
        Self {
            step_id: None,
            message: message.into(),
        }
    }

    pub fn step(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_id: Some(step_id.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(id) => write!(f, "step '{id}': {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Errors from loading a definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File extension is not one of yaml, yml, json.
    #[error("unsupported definition format: {0}")]
    UnsupportedFormat(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a `WorkflowDefinition`.
pub fn parse_definition_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Parse a JSON string into a `WorkflowDefinition`.
pub fn parse_definition_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Load a definition from disk, choosing the parser by file extension.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)?;
    match ext.as_str() {
        "yaml" | "yml" => parse_definition_yaml(&content),
        "json" => parse_definition_json(&content),
        other => Err(DefinitionError::UnsupportedFormat(if other.is_empty() {
            path.display().to_string()
        } else {
            other.to_string()
        })),
    }
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Check structural constraints and return every issue found.
///
/// Checks:
/// - workflow id is non-empty and at least one step exists
/// - step ids are unique and type tags non-empty
/// - edges and `depends_on` reference declared steps
/// - a step pair is not connected by both an AND and an OR edge
/// - each step's incoming OR edges belong to a single group
/// - retry overrides and timeouts are in range
///
/// Cycles are not reported here; the planner owns cycle detection.
pub fn validate_structure(def: &WorkflowDefinition) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();

    if def.id.trim().is_empty() {
        issues.push(ConfigIssue::workflow("workflow id must not be empty"));
    }
    if def.nodes.is_empty() {
        issues.push(ConfigIssue::workflow("workflow must have at least one step"));
    }

    let mut ids = HashSet::new();
    for node in &def.nodes {
        if node.id.trim().is_empty() {
            issues.push(ConfigIssue::workflow("step id must not be empty"));
        } else if !ids.insert(node.id.as_str()) {
            issues.push(ConfigIssue::workflow(format!(
                "duplicate step id: '{}'",
                node.id
            )));
        }
        if node.type_tag.trim().is_empty() {
            issues.push(ConfigIssue::step(&node.id, "step type must not be empty"));
        }
        if let Some(retry) = &node.retry {
            for message in retry_config_issues(retry) {
                issues.push(ConfigIssue::step(&node.id, message));
            }
        }
        if node.timeout_ms == Some(0) {
            issues.push(ConfigIssue::step(&node.id, "timeout_ms must be > 0"));
        }
    }

    for node in &def.nodes {
        for dep in &node.depends_on {
            if !ids.contains(dep.as_str()) {
                issues.push(ConfigIssue::step(
                    &node.id,
                    format!("depends on unknown step '{dep}'"),
                ));
            }
        }
    }

    for edge in &def.edges {
        for end in [&edge.from, &edge.to] {
            if !ids.contains(end.as_str()) {
                issues.push(ConfigIssue::workflow(format!(
                    "edge {} -> {} references unknown step '{}'",
                    edge.from, edge.to, end
                )));
            }
        }
    }

    let mut kinds: BTreeMap<(&str, &str), BTreeSet<bool>> = BTreeMap::new();
    let mut or_groups: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in &def.edges {
        kinds
            .entry((edge.from.as_str(), edge.to.as_str()))
            .or_default()
            .insert(matches!(edge.kind, EdgeKind::And));
        if let EdgeKind::Or(group) = &edge.kind {
            or_groups
                .entry(edge.to.as_str())
                .or_default()
                .insert(group.as_str());
        }
    }
    for node in &def.nodes {
        for dep in &node.depends_on {
            kinds
                .entry((dep.as_str(), node.id.as_str()))
                .or_default()
                .insert(true);
        }
    }

    for ((from, to), set) in &kinds {
        if set.len() > 1 {
            issues.push(ConfigIssue::step(
                *to,
                format!("dependency on '{from}' is declared as both AND and OR"),
            ));
        }
    }
    for (to, groups) in &or_groups {
        if groups.len() > 1 {
            let names: Vec<&str> = groups.iter().copied().collect();
            issues.push(ConfigIssue::step(
                *to,
                format!(
                    "step belongs to more than one OR-group ({})",
                    names.join(", ")
                ),
            ));
        }
    }

    if def.variables.keys().any(|k| k.trim().is_empty()) {
        issues.push(ConfigIssue::workflow("variable names must not be empty"));
    }

    issues
}

/// Range checks for a retry policy.
pub fn retry_config_issues(config: &RetryPolicyConfig) -> Vec<String> {
    let mut issues = Vec::new();
    if config.max_attempts < 1 {
        issues.push("retry.max_attempts must be >= 1".to_string());
    }
    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        issues.push("retry.multiplier must be a finite number >= 1.0".to_string());
    }
    if config.base_delay_ms > config.max_delay_ms {
        issues.push("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
    }
    issues
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// SHA-256 of the definition's canonical JSON form, hex-encoded.
///
/// Object keys serialize in sorted order, so two definitions that differ only
/// in the key order of their source files hash identically.
pub fn content_hash(def: &WorkflowDefinition) -> String {
    let bytes = serde_json::to_vec(def).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_types::workflow::Edge;
    use serde_json::json;

    fn def(value: serde_json::Value) -> WorkflowDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn valid_definition_has_no_issues() {
        let d = def(json!({
            "id": "wf",
            "nodes": [
                { "id": "a", "type": "input" },
                { "id": "b", "type": "output", "depends_on": ["a"] }
            ]
        }));
        assert!(validate_structure(&d).is_empty());
    }

    #[test]
    fn collects_all_issues() {
        let d = def(json!({
            "id": "",
            "nodes": [
                { "id": "a", "type": "input" },
                { "id": "a", "type": "" },
                { "id": "c", "type": "output", "depends_on": ["ghost"] }
            ],
            "edges": [ { "from": "a", "to": "nowhere" } ]
        }));
        let issues = validate_structure(&d);
        let text: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert!(text.iter().any(|m| m.contains("workflow id")));
        assert!(text.iter().any(|m| m.contains("duplicate step id")));
        assert!(text.iter().any(|m| m.contains("step type must not be empty")));
        assert!(text.iter().any(|m| m.contains("unknown step 'ghost'")));
        assert!(text.iter().any(|m| m.contains("unknown step 'nowhere'")));
    }

    #[test]
    fn rejects_overlapping_or_groups() {
        let mut d = def(json!({
            "id": "wf",
            "nodes": [
                { "id": "a", "type": "input" },
                { "id": "b", "type": "input" },
                { "id": "j", "type": "output" }
            ]
        }));
        d.edges = vec![Edge::or("a", "j", "left"), Edge::or("b", "j", "right")];
        let issues = validate_structure(&d);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].step_id.as_deref(), Some("j"));
        assert!(issues[0].message.contains("more than one OR-group"));
    }

    #[test]
    fn rejects_and_or_conflict_on_same_pair() {
        let mut d = def(json!({
            "id": "wf",
            "nodes": [
                { "id": "a", "type": "input" },
                { "id": "j", "type": "output", "depends_on": ["a"] }
            ]
        }));
        d.edges = vec![Edge::or("a", "j", "merge")];
        let issues = validate_structure(&d);
        assert!(issues
            .iter()
            .any(|i| i.message.contains("both AND and OR")));
    }

    #[test]
    fn rejects_bad_retry_override() {
        let d = def(json!({
            "id": "wf",
            "nodes": [
                { "id": "a", "type": "input",
                  "retry": { "max_attempts": 0, "multiplier": 0.5 },
                  "timeout_ms": 0 }
            ]
        }));
        let issues = validate_structure(&d);
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn content_hash_ignores_source_key_order() {
        let a = parse_definition_yaml(
            "id: wf\nnodes:\n  - id: s\n    type: transform\n    config: { x: 1, y: 2 }\n",
        )
        .unwrap();
        let b = parse_definition_json(
            r#"{"nodes":[{"config":{"y":2,"x":1},"type":"transform","id":"s"}],"id":"wf"}"#,
        )
        .unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn content_hash_changes_with_graph() {
        let a = def(json!({ "id": "wf", "nodes": [ { "id": "s", "type": "input" } ] }));
        let mut b = a.clone();
        b.nodes[0].type_tag = "output".to_string();
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("wf.yaml");
        std::fs::write(&yaml, "id: wf\nnodes:\n  - id: a\n    type: input\n").unwrap();
        let json_path = dir.path().join("wf.json");
        std::fs::write(&json_path, r#"{"id":"wf","nodes":[{"id":"a","type":"input"}]}"#).unwrap();
        let txt = dir.path().join("wf.txt");
        std::fs::write(&txt, "").unwrap();

        assert_eq!(load_definition_file(&yaml).unwrap().id, "wf");
        assert_eq!(load_definition_file(&json_path).unwrap().nodes.len(), 1);
        assert!(matches!(
            load_definition_file(&txt),
            Err(DefinitionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn parse_error_is_reported() {
        assert!(matches!(
            parse_definition_yaml("nodes: [ {"),
            Err(DefinitionError::Parse(_))
        ));
    }
}
