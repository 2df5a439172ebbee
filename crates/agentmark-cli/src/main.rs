//! AgentMark CLI
//!
//! Developer tool for scaffolding, validating and building agent projects.
//!
//! Exit codes: 0 success, 1 validation failed, 2 environment or
//! filesystem problem, 3 internal compiler error.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::Outcome;

/// AgentMark - agent workflow compiler
#[derive(Parser)]
#[command(name = "agentmark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root (contains agents/ and tools/)
    #[arg(short, long, default_value = ".", global = true)]
    project: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project
    Init {
        /// Directory to create
        path: String,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Check every document without generating anything
    Validate {
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Compile the project into a Python service
    Build {
        /// Output directory, relative to the project root
        #[arg(short, long, default_value = "build")]
        output: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Compile without writing any files
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Init { path, name } => commands::init::run(&path, name.as_deref()).await,
        Commands::Validate { strict, json } => {
            commands::validate::run(&cli.project, strict, json).await
        }
        Commands::Build {
            output,
            strict,
            dry_run,
        } => commands::build::run(&cli.project, &output, strict, dry_run).await,
    };

    match result {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Invalid) => ExitCode::from(1),
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(commands::exit_code(&err))
        }
    }
}
