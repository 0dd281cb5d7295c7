use clap::Parser;
use snafu::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;
mod config;
mod engine;
mod loader;
mod persistence;
mod providers;
mod retry;
mod runner;
mod schedule;
mod scheduler;
mod workflow;

use cmd::{MigrateArgs, RunArgs, handle_migrate, handle_run};
use config::{MagpieConfig, StoreConfig};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Run error: {source}"))]
    Run { source: cmd::run::Error },

    #[snafu(display("Migrate error: {source}"))]
    Migrate { source: cmd::migrate::Error },
}

#[derive(Parser, Debug)]
#[command(name = "magpie")]
#[command(version = "0.1.0")]
#[command(about = "A lightweight cron-driven DAG workflow orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the scheduler loop
    Run(RunArgs),
    /// Create the store schema and exit
    Migrate(MigrateArgs),
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    let filter_layer = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Pick up ENV / SQLITE_DB / POSTGRES_* from a local .env if present.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load configuration from file, env vars, and defaults
    let global_config = MagpieConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(args.verbose);

            // Merge CLI args with config (CLI takes precedence)
            let config = args.merge_with_config(global_config);

            handle_run(config, StoreConfig::from_env())
                .await
                .context(RunSnafu)
        }
        Commands::Migrate(args) => {
            init_tracing(args.verbose);

            handle_migrate(StoreConfig::from_env())
                .await
                .context(MigrateSnafu)
        }
    }
}
