//! CLI command definitions and dispatch for the `flowline` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod engine;
pub mod plan;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};
use flowline_types::run::StepStatus;

/// Plan and run dependency-aware workflows.
#[derive(Parser)]
#[command(name = "flowline", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the batch execution plan for a workflow file.
    Plan {
        /// Path to a workflow definition (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Run every pre-flight check without executing anything.
    Validate {
        /// Path to a workflow definition (.yaml, .yml or .json).
        file: PathBuf,

        /// Engine config TOML.
        #[arg(long, env = "FLOWLINE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Execute a workflow file.
    Run {
        /// Path to a workflow definition (.yaml, .yml or .json).
        file: PathBuf,

        /// Run input as a JSON document.
        #[arg(long)]
        input: Option<String>,

        /// Engine config TOML.
        #[arg(long, env = "FLOWLINE_CONFIG")]
        config: Option<PathBuf>,

        /// Append the run result to this JSON-lines file.
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Colored status cell for tables.
pub fn status_cell(status: StepStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        StepStatus::Succeeded => cell.fg(Color::Green),
        StepStatus::Failed => cell.fg(Color::Red),
        StepStatus::Skipped => cell.fg(Color::Yellow),
        StepStatus::Pending | StepStatus::Ready | StepStatus::Running => cell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_options() {
        let cli = Cli::try_parse_from([
            "flowline", "run", "wf.yaml", "--input", "{\"a\":1}", "--log", "runs.jsonl", "--json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { file, input, log, .. } => {
                assert_eq!(file, PathBuf::from("wf.yaml"));
                assert_eq!(input.as_deref(), Some("{\"a\":1}"));
                assert_eq!(log, Some(PathBuf::from("runs.jsonl")));
            }
            _ => panic!("expected run"),
        }
    }
}
