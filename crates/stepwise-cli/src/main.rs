//! Stepwise CLI: run sequential coding-agent pipelines and workflows.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stepwise_cli::commands;

/// Stepwise: sequential agent pipelines with pause/resume
#[derive(Parser)]
#[command(name = "stepwise", version, about = "Stepwise: sequential agent pipelines with pause/resume")]
pub struct Cli {
    /// Path to a config file (default: ./.stepwise/config.yaml, then ~/.stepwise/config.yaml)
    #[arg(long, global = true, env = "STEPWISE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline file (JSON or YAML list of steps)
    Run {
        /// Pipeline file
        file: PathBuf,
        /// Default model for steps that do not name one
        #[arg(long)]
        model: Option<String>,
        /// Working directory for the agent and check commands
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Index of the first step to run
        #[arg(long, default_value_t = 0)]
        start_index: usize,
    },

    /// Run and inspect YAML-defined workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Run a workflow, resuming from its job log if one exists
    Run {
        /// Path to the workflow YAML file
        file: PathBuf,
        /// Workflow input as key=value (repeatable)
        #[arg(long = "input", short = 'i')]
        inputs: Vec<String>,
        /// Working directory for the agent and check commands
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Ignore any existing job log and start from the first step
        #[arg(long)]
        fresh: bool,
    },
    /// Validate a workflow YAML file without executing it
    Validate {
        /// Path to the workflow YAML file
        file: PathBuf,
    },
    /// Show the job log of a workflow
    Status {
        /// Path to the workflow YAML file
        file: PathBuf,
        /// Print the raw job log as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the job log of a workflow
    Clean {
        /// Path to the workflow YAML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepwise_core=info,stepwise_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            file,
            model,
            cwd,
            start_index,
        }) => match commands::load_config(cli.config.as_deref()) {
            Ok(config) => commands::run::run(&config, &file, model, cwd, start_index).await,
            Err(e) => Err(e),
        },

        Some(Commands::Workflow { action }) => match action {
            WorkflowAction::Run {
                file,
                inputs,
                cwd,
                fresh,
            } => match commands::load_config(cli.config.as_deref()) {
                Ok(config) => commands::workflow::run(&config, &file, &inputs, cwd, fresh).await,
                Err(e) => Err(e),
            },
            WorkflowAction::Validate { file } => commands::workflow::validate(&file),
            WorkflowAction::Status { file, json } => commands::workflow::status(&file, json),
            WorkflowAction::Clean { file } => commands::workflow::clean(&file),
        },

        None => {
            // No subcommand: show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
