//! flowline CLI entry point.
//!
//! Binary name: `flowline`
//!
//! Parses CLI arguments, initializes tracing, then dispatches to the
//! appropriate command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;
use flowline_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions need neither tracing nor an engine
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowline", &mut std::io::stdout());
        return Ok(());
    }

    let tracing_options = TracingOptions {
        otel: cli.otel,
        ..TracingOptions::from_verbosity(cli.verbose, cli.quiet)
    };
    init_tracing(&tracing_options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Plan { file } => cli::plan::handle_plan(&file, cli.json),
        Commands::Validate { file, config } => {
            cli::validate::handle_validate(&file, config.as_deref(), cli.json).await
        }
        Commands::Run {
            file,
            input,
            config,
            log,
        } => {
            cli::run::handle_run(
                &file,
                input.as_deref(),
                config.as_deref(),
                log.as_deref(),
                cli.json,
                cli.quiet,
            )
            .await
        }
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
