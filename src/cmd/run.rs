use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{MagpieConfig, SchedulerConfig, StoreConfig};
use crate::engine::ExecutionEngine;
use crate::loader::WorkflowLoader;
use crate::providers::persistence;
use crate::runner::TaskRunner;
use crate::scheduler::Scheduler;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Workflow directory {} does not exist", path.display()))]
    WorkflowDirMissing { path: PathBuf },

    #[snafu(display("Store error: {source}"))]
    Store { source: crate::persistence::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory containing workflow definition files
    #[arg(short = 'd', long, value_name = "DIR")]
    pub workflow_dir: Option<PathBuf>,

    /// Seconds between scheduler ticks
    #[arg(long, value_name = "SECONDS")]
    pub tick: Option<u64>,

    /// Maximum number of concurrently running tasks within a firing
    #[arg(short = 'w', long, value_name = "COUNT")]
    pub workers: Option<usize>,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl RunArgs {
    /// Merge CLI arguments over the layered configuration; flags that
    /// were passed take precedence.
    #[must_use]
    pub fn merge_with_config(&self, config: MagpieConfig) -> SchedulerConfig {
        let mut scheduler = config.scheduler;
        if let Some(workflow_dir) = &self.workflow_dir {
            scheduler.workflow_dir = workflow_dir.clone();
        }
        if let Some(tick) = self.tick {
            scheduler.tick_secs = tick;
        }
        if let Some(workers) = self.workers {
            scheduler.workers = workers;
        }
        scheduler
    }
}

/// Wire every component and enter the tick loop.
///
/// # Errors
/// Returns an error when initialization fails: the workflow directory is
/// missing, the store is unreachable, or the schema cannot be ensured.
pub async fn handle_run(config: SchedulerConfig, store: StoreConfig) -> Result<()> {
    ensure!(
        config.workflow_dir.is_dir(),
        WorkflowDirMissingSnafu {
            path: config.workflow_dir.clone(),
        }
    );

    let gateway = persistence::connect(&store).await.context(StoreSnafu)?;
    gateway.ensure_schema().await.context(StoreSnafu)?;
    info!(store = %store.database_url(), "store ready");

    let runner = TaskRunner::with_venv_root(&config.venv_root);
    let engine =
        ExecutionEngine::new(Arc::clone(&gateway), runner).with_workers(config.workers);
    let loader = WorkflowLoader::new(&config.workflow_dir, gateway);

    let mut scheduler =
        Scheduler::new(loader, engine).with_tick(Duration::from_secs(config.tick_secs));
    scheduler.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let args = RunArgs {
            workflow_dir: Some(PathBuf::from("flows")),
            tick: Some(5),
            workers: None,
            verbose: false,
        };
        let merged = args.merge_with_config(MagpieConfig::default());
        assert_eq!(merged.workflow_dir, PathBuf::from("flows"));
        assert_eq!(merged.tick_secs, 5);
        // Untouched flags keep their configured defaults.
        assert_eq!(merged.workers, 5);
    }

    #[tokio::test]
    async fn missing_workflow_dir_is_fatal() {
        let config = SchedulerConfig {
            workflow_dir: PathBuf::from("/nonexistent/dags"),
            ..SchedulerConfig::default()
        };
        let store = StoreConfig::Sqlite {
            path: "unused.db".to_string(),
        };
        let err = handle_run(config, store).await.unwrap_err();
        assert!(matches!(err, Error::WorkflowDirMissing { .. }));
    }
}
