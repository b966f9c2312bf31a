use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tessera::workflow::CoordinationStrategy;
use tessera::{OrchestratorConfig, init_tracing};

mod commands;
mod loader;

use loader::{CliError, load_workflow};

#[derive(Parser, Debug)]
#[command(name = "tessera", version)]
#[command(about = "Tessera CLI - workflow validation and dry runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a workflow definition and print its execution plan
    Validate {
        /// Definition file (.yaml, .yml or .json)
        file: PathBuf,
    },
    /// Run a workflow against echo agents and print the final state
    Run {
        /// Definition file (.yaml, .yml or .json)
        file: PathBuf,
        /// Override the configured coordination strategy (sequential, parallel)
        #[arg(long)]
        strategy: Option<CoordinationStrategy>,
    },
    /// Print the effective configuration
    Config,
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!(error = %e, "Failed to render output"),
    }
}

async fn execute(command: Commands, mut config: OrchestratorConfig) -> Result<bool, CliError> {
    match command {
        Commands::Validate { file } => {
            let workflow = load_workflow(&file)?;
            print_json(&commands::validate(&workflow, config.workflow.max_steps)?);
            Ok(true)
        }
        Commands::Run { file, strategy } => {
            if let Some(strategy) = strategy {
                config.workflow.coordination_strategy = strategy;
            }
            let workflow = load_workflow(&file)?;
            let report = commands::run(workflow, config).await?;
            print_json(&report);
            Ok(report["status"] == "completed")
        }
        Commands::Config => {
            print_json(&config.summary());
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.telemetry);

    match execute(cli.command, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
