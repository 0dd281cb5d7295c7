use clap::Parser;
use snafu::prelude::*;
use tracing::info;

use crate::config::StoreConfig;
use crate::providers::persistence;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Store error: {source}"))]
    Store { source: crate::persistence::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct MigrateArgs {
    /// Enable verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Create the schema in the configured store if it is absent.
///
/// # Errors
/// Returns an error if the store is unreachable or a schema statement
/// fails.
pub async fn handle_migrate(store: StoreConfig) -> Result<()> {
    info!(store = %store.database_url(), "running migrations");
    let gateway = persistence::connect(&store).await.context(StoreSnafu)?;
    gateway.ensure_schema().await.context(StoreSnafu)?;
    info!("migration complete");
    Ok(())
}
