//! `flowline validate`: full pre-flight without dispatching any step.

use std::path::Path;

use anyhow::{bail, Result};
use console::style;
use flowline_core::workflow::engine::EngineError;
use serde_json::json;

use super::engine::{build_engine, load_config, load_definition};

pub async fn handle_validate(file: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let def = load_definition(file)?;
    let config = load_config(config).await;
    let engine = build_engine(file, config, None)?;

    let problems: Vec<String> = match engine.preflight(&def) {
        Ok(_) => Vec::new(),
        Err(EngineError::Configuration(issues)) => issues.iter().map(ToString::to_string).collect(),
        Err(other) => vec![other.to_string()],
    };

    if json {
        let report = json!({
            "workflow_id": def.id,
            "valid": problems.is_empty(),
            "errors": &problems,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if problems.is_empty() {
        println!(
            "  {} Workflow '{}' is valid ({} steps)",
            style("✓").green(),
            style(&def.id).cyan(),
            def.nodes.len()
        );
    } else {
        println!(
            "  {} Workflow '{}' failed validation:",
            style("✗").red(),
            style(&def.id).cyan()
        );
        for problem in &problems {
            println!("    - {problem}");
        }
    }

    if !problems.is_empty() {
        bail!("validation failed with {} problem(s)", problems.len());
    }
    Ok(())
}
