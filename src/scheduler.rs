//! Cron firing loop and the top-level tick driver.
//!
//! The driver owns a single control task: each tick rescans the
//! definition directory, fires every workflow whose next-fire instant has
//! passed, and sleeps. Firings run to completion on the tick task, so two
//! firings of the same workflow can never overlap. The tick cadence
//! bounds worst-case scheduling lateness.

use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

use crate::engine::ExecutionEngine;
use crate::loader::WorkflowLoader;

/// Default seconds between driver ticks.
pub const DEFAULT_TICK: Duration = Duration::from_secs(15);

pub struct Scheduler {
    loader: WorkflowLoader,
    engine: ExecutionEngine,
    tick: Duration,
}

impl Scheduler {
    #[must_use]
    pub fn new(loader: WorkflowLoader, engine: ExecutionEngine) -> Self {
        Self {
            loader,
            engine,
            tick: DEFAULT_TICK,
        }
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Block forever in the tick loop.
    pub async fn run(&mut self) {
        info!(
            directory = %self.loader.directory().display(),
            tick_secs = self.tick.as_secs(),
            "scheduler started"
        );
        loop {
            self.loader.scan(Utc::now()).await;
            self.fire_due().await;
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Fire every registered workflow whose next-fire instant has passed.
    ///
    /// The new next-fire instant is computed from the previous one, not
    /// from the wall clock, so slow firings keep their cadence. Missed
    /// cycles are not backfilled: a firing that ends with its next-fire
    /// instant still in the past simply fires again on the next tick.
    pub async fn fire_due(&mut self) {
        let now = Utc::now();
        let engine = &self.engine;
        for entry in self.loader.entries_mut() {
            if entry.next_fire > now {
                continue;
            }
            info!(
                workflow = %entry.workflow.name(),
                scheduled_for = %entry.next_fire,
                "firing workflow"
            );
            if let Err(e) = engine.execute(&entry.workflow).await {
                error!(
                    workflow = %entry.workflow.name(),
                    error = %e,
                    "firing aborted"
                );
            }
            match entry.workflow.schedule().next_after(entry.next_fire) {
                Some(next_fire) => entry.next_fire = next_fire,
                None => error!(
                    workflow = %entry.workflow.name(),
                    "schedule has no further fire times"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceGateway;
    use crate::providers::persistence::SqliteGateway;
    use crate::runner::TaskRunner;
    use std::sync::Arc;

    struct Fixture {
        scheduler: Scheduler,
        gateway: Arc<dyn PersistenceGateway>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(cron: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let script = dir.path().join("noop.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let dags = dir.path().join("dags");
        std::fs::create_dir(&dags).unwrap();
        std::fs::write(
            dags.join("ticker.yaml"),
            format!(
                "name: ticker\nschedule: \"{cron}\"\ntasks:\n  - name: noop\n    script: {}\n",
                script.display()
            ),
        )
        .unwrap();

        let db_path = dir.path().join("magpie-test.db");
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(
            SqliteGateway::new(&format!("sqlite:{}", db_path.display()))
                .await
                .unwrap(),
        );
        gateway.ensure_schema().await.unwrap();

        let loader = WorkflowLoader::new(&dags, Arc::clone(&gateway));
        let engine = ExecutionEngine::new(Arc::clone(&gateway), TaskRunner::new());
        Fixture {
            scheduler: Scheduler::new(loader, engine).with_tick(Duration::from_secs(1)),
            gateway,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn due_workflow_fires_and_advances_one_cron_step() {
        let mut fx = fixture("*/1 * * * *").await;
        fx.scheduler.loader.scan(Utc::now()).await;

        // Pull the fire instant into the past so this tick is due.
        let overdue = Utc::now() - chrono::Duration::minutes(2);
        let expected_next = {
            let entry = fx.scheduler.loader.entries_mut().next().unwrap();
            entry.next_fire = overdue;
            entry.workflow.schedule().next_after(overdue).unwrap()
        };

        fx.scheduler.fire_due().await;

        let dag_id = fx.gateway.upsert_workflow("ticker").await.unwrap();
        let attempts = fx.gateway.attempts_for_workflow(dag_id).await.unwrap();
        assert_eq!(attempts.len(), 1);

        // One cron step from the previous anchor, not from the wall clock.
        let entry = fx.scheduler.loader.entries_mut().next().unwrap();
        assert_eq!(entry.next_fire, expected_next);
    }

    #[tokio::test]
    async fn workflow_not_yet_due_does_not_fire() {
        let mut fx = fixture("*/1 * * * *").await;
        fx.scheduler.loader.scan(Utc::now()).await;

        {
            let entry = fx.scheduler.loader.entries_mut().next().unwrap();
            entry.next_fire = Utc::now() + chrono::Duration::hours(1);
        }
        fx.scheduler.fire_due().await;

        let dag_id = fx.gateway.upsert_workflow("ticker").await.unwrap();
        let attempts = fx.gateway.attempts_for_workflow(dag_id).await.unwrap();
        assert!(attempts.is_empty());
    }

    #[tokio::test]
    async fn late_firing_catches_up_one_step_per_pass() {
        let mut fx = fixture("*/1 * * * *").await;
        fx.scheduler.loader.scan(Utc::now()).await;

        let overdue = Utc::now() - chrono::Duration::minutes(5);
        {
            let entry = fx.scheduler.loader.entries_mut().next().unwrap();
            entry.next_fire = overdue;
        }

        // Each pass fires once and advances one minute; no burst of
        // backfilled firings inside a single pass.
        fx.scheduler.fire_due().await;
        fx.scheduler.fire_due().await;

        let dag_id = fx.gateway.upsert_workflow("ticker").await.unwrap();
        let attempts = fx.gateway.attempts_for_workflow(dag_id).await.unwrap();
        assert_eq!(attempts.len(), 2);
    }
}
