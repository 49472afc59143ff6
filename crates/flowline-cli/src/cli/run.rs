//! `flowline run`: execute a workflow file and report the result.

use std::path::Path;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use flowline_types::run::{RunResult, RunStatus, StepRunRecord};
use serde_json::Value;
use uuid::Uuid;

use super::engine::{build_engine, load_config, load_definition};
use super::status_cell;

pub async fn handle_run(
    file: &Path,
    input: Option<&str>,
    config: Option<&Path>,
    log: Option<&Path>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let def = load_definition(file)?;
    let input = parse_input(input)?;
    let config = load_config(config).await;
    let engine = build_engine(file, config, log)?;

    let run_id = Uuid::now_v7();
    let run = engine.run_with_id(run_id, &def, input);
    tokio::pin!(run);

    // First Ctrl+C cancels between batches; dispatched steps still finish.
    let result = loop {
        tokio::select! {
            result = &mut run => break result?,
            _ = tokio::signal::ctrl_c() => {
                if engine.cancel(run_id) && !quiet {
                    eprintln!("  {} cancelling run {run_id}...", style("!").yellow());
                }
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !quiet {
        print_result(&def.id, &result);
    }

    if result.status != RunStatus::Succeeded {
        bail!("run {} finished with status {}", result.run_id, result.status);
    }
    Ok(())
}

fn parse_input(input: Option<&str>) -> Result<Value> {
    match input {
        Some(raw) => serde_json::from_str(raw).context("--input must be a JSON document"),
        None => Ok(Value::Object(Default::default())),
    }
}

fn print_result(workflow_id: &str, result: &RunResult) {
    let headline = match result.status {
        RunStatus::Succeeded => style("✓").green(),
        RunStatus::CompletedWithFailures | RunStatus::Cancelled => style("!").yellow(),
        RunStatus::Failed => style("✗").red(),
    };
    println!();
    println!(
        "  {} Run {} of '{}': {}",
        headline,
        style(result.run_id).dim(),
        style(workflow_id).cyan(),
        result.status
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Batch"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Detail"),
        ]);

    for record in &result.step_results {
        table.add_row(vec![
            Cell::new(&record.step_id),
            Cell::new(&record.type_tag),
            Cell::new(record.batch),
            status_cell(record.status),
            Cell::new(record.attempts),
            Cell::new(format!("{}ms", record.duration_ms)),
            Cell::new(detail(record)),
        ]);
    }
    println!("{table}");

    let metrics = &result.metrics;
    println!(
        "  {} batches, {} attempts ({} retried), parallel efficiency {:.2}",
        metrics.batches.len(),
        metrics.attempts_recorded,
        metrics.retry_attempts,
        metrics.parallel_efficiency
    );
    if let Some(summary) = &result.error_summary {
        println!("  {}", style(&summary.message).red());
    }
    println!();
}

fn detail(record: &StepRunRecord) -> String {
    if let Some(error) = &record.error {
        return format!("[{}] {}", error.category, error.message);
    }
    if let Some(reason) = &record.skip_reason {
        return reason.clone();
    }
    match &record.output {
        Some(Value::String(s)) => truncate(s, 60),
        Some(other) => truncate(&other.to_string(), 60),
        None => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn input_defaults_to_empty_object() {
        assert_eq!(parse_input(None).unwrap(), json!({}));
        assert_eq!(parse_input(Some(r#"{"n": 1}"#)).unwrap(), json!({ "n": 1 }));
        assert!(parse_input(Some("not json")).is_err());
    }

    #[test]
    fn detail_prefers_error_then_skip_reason() {
        let skipped = StepRunRecord::skipped("b", "transform", 1, "upstream step 'a' failed");
        assert_eq!(detail(&skipped), "upstream step 'a' failed");
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
