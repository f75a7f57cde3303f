// src/bin/kiflow.rs

use anyhow::Result;
use clap::Parser;
use colored::*;
use kiflow::{
    cli::{self, Cli},
    constants::{EXIT_BAD_ARGS, EXIT_BAD_CONFIG, EXIT_OK},
    core::orchestrator::RunError,
};

/// The main entry point of the `kiflow` application.
/// It sets up logging, parses arguments, runs the pipeline,
/// and maps the outcome to the process exit status.
fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // `--help` and `--version` also arrive here, on stdout.
            let code = if e.use_stderr() { EXIT_BAD_ARGS } else { EXIT_OK };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .format_timestamp(None)
        .init();

    if let Err(e) = run_cli(&cli) {
        // --- Centralized Error Handling ---
        // Pipeline errors carry their own exit status, anything else is a configuration problem.
        let code = e
            .downcast_ref::<RunError>()
            .map_or(EXIT_BAD_CONFIG, RunError::exit_code);
        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(code);
    }
}

fn run_cli(cli: &Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);
    cli::run(cli)?;
    Ok(())
}
