//! `flowline plan`: show the batch partition of a workflow.

use std::path::Path;

use anyhow::{bail, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use flowline_core::workflow::dag::plan;
use flowline_core::workflow::definition::validate_structure;
use flowline_types::workflow::ExecutionPlan;

use super::engine::load_definition;

pub fn handle_plan(file: &Path, json: bool) -> Result<()> {
    let def = load_definition(file)?;

    let issues = validate_structure(&def);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("  {} {issue}", style("✗").red());
        }
        bail!("workflow '{}' has {} structural issue(s)", def.id, issues.len());
    }

    let plan = plan(&def)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&def.id, &plan);
    }

    if plan.has_cycles {
        bail!("workflow '{}' contains a cycle", def.id);
    }
    Ok(())
}

fn print_plan(workflow_id: &str, plan: &ExecutionPlan) {
    println!();
    if plan.has_cycles {
        let nodes = plan
            .cycle_nodes
            .as_ref()
            .map(|n| n.iter().map(String::as_str).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        println!(
            "  {} Workflow '{}' contains a cycle through: {}",
            style("✗").red(),
            style(workflow_id).cyan(),
            style(nodes).yellow()
        );
        println!();
        return;
    }

    println!(
        "  Plan for '{}': {} step(s) in {} batch(es)",
        style(workflow_id).cyan(),
        plan.step_count(),
        plan.batch_count()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Batch").fg(Color::Cyan),
            Cell::new("Steps"),
            Cell::new("Depends on"),
        ]);

    for (index, batch) in plan.execution_order.iter().enumerate() {
        let deps: Vec<String> = batch
            .iter()
            .filter_map(|id| {
                let deps = plan.dependencies.get(id)?;
                (!deps.is_empty()).then(|| {
                    let list: Vec<&str> = deps.iter().map(String::as_str).collect();
                    format!("{id} <- {}", list.join(", "))
                })
            })
            .collect();
        table.add_row(vec![
            Cell::new(index),
            Cell::new(batch.join(", ")),
            Cell::new(if deps.is_empty() { "-".to_string() } else { deps.join("\n") }),
        ]);
    }

    println!("{table}");
    println!();
}
