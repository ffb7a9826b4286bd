//! hook-sim: replays scripted host scenarios through the overlay hook orchestrator.
//!
//! ## Subcommands
//!
//! - `run`: Replays a scenario file and prints a JSON summary
//! - `targets`: Prints the effective interception targets

mod logging;
mod scenario;

use clap::{Parser, Subcommand};
use hook_core::{load_hook_config, load_hook_config_from, HookConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hook-sim")]
#[command(about = "Download overlay hook simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario against a simulated host
    Run {
        /// Scenario JSON file
        #[arg(value_name = "SCENARIO")]
        scenario: PathBuf,

        /// Hook config file (defaults to the user config location)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the interception targets that would be installed
    Targets {
        /// Hook config file (defaults to the user config location)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn resolve_config(path: Option<&Path>) -> Result<HookConfig, hook_core::HookError> {
    match path {
        Some(path) => load_hook_config_from(path),
        None => Ok(load_hook_config()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn run(command: Commands) -> Result<(), String> {
    match command {
        Commands::Run { scenario, config } => {
            let config = resolve_config(config.as_deref()).map_err(|e| e.to_string())?;
            let scenario = scenario::Scenario::load(&scenario).map_err(|e| e.to_string())?;
            let summary = scenario::run(&scenario, config).map_err(|e| e.to_string())?;
            print_json(&summary)
        }
        Commands::Targets { config } => {
            let config = resolve_config(config.as_deref()).map_err(|e| e.to_string())?;
            print_json(&config)
        }
    }
}

fn main() {
    let logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        tracing::error!(error = %e, "hook-sim failed");
        drop(logging_guard);
        std::process::exit(1);
    }
}
