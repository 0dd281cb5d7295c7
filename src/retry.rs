//! Attempt supervision with bounded retries.
//!
//! [`supervise`] runs one task to a terminal status within a firing: it
//! makes sure the task row exists, then opens, runs, and seals attempts
//! until one succeeds or `max_attempts` is exhausted. Attempts execute
//! strictly sequentially with no backoff delay; a failed attempt is
//! retried immediately.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::persistence::{self, PersistenceGateway, TerminalStatus};
use crate::runner::{Outcome, TaskRunner};
use crate::workflow::Task;

/// Run `task` under the retry policy and record every attempt.
///
/// A gateway error while opening or sealing an attempt marks the task
/// failed for this firing; the engine continues with other tasks.
pub async fn supervise(
    gateway: &dyn PersistenceGateway,
    runner: &TaskRunner,
    dag_id: i64,
    task: &Task,
) -> TerminalStatus {
    let task_id = match ensure_task(gateway, dag_id, task).await {
        Ok(task_id) => task_id,
        Err(e) => {
            error!(task = %task.name, error = %e, "failed to register task record");
            return TerminalStatus::Failed;
        }
    };

    for attempt in 1..=task.max_attempts {
        let attempt_id = match gateway.begin_attempt(dag_id, task_id, Utc::now()).await {
            Ok(attempt_id) => attempt_id,
            Err(e) => {
                error!(task = %task.name, error = %e, "failed to open attempt");
                return TerminalStatus::Failed;
            }
        };

        let outcome = runner.run(task).await;
        let status = match outcome {
            Outcome::Success => TerminalStatus::Success,
            Outcome::Failed(ref failure) => {
                warn!(
                    task = %task.name,
                    attempt,
                    max_attempts = task.max_attempts,
                    reason = %failure,
                    "attempt failed"
                );
                TerminalStatus::Failed
            }
        };

        if let Err(e) = gateway
            .finalize_attempt(attempt_id, Utc::now(), status)
            .await
        {
            error!(task = %task.name, error = %e, "failed to seal attempt");
            return TerminalStatus::Failed;
        }

        if status == TerminalStatus::Success {
            info!(task = %task.name, attempt, "task succeeded");
            return TerminalStatus::Success;
        }
    }

    error!(
        task = %task.name,
        max_attempts = task.max_attempts,
        "task failed after exhausting its attempts"
    );
    TerminalStatus::Failed
}

/// Find or create the task row, refreshing script path and dependencies
/// so the record tracks the current definition.
async fn ensure_task(
    gateway: &dyn PersistenceGateway,
    dag_id: i64,
    task: &Task,
) -> persistence::Result<i64> {
    let script_path = task.script_path.display().to_string();
    match gateway.find_task(dag_id, &task.name).await? {
        Some(task_id) => {
            gateway
                .refresh_task(task_id, &script_path, &task.dependencies)
                .await?;
            Ok(task_id)
        }
        None => {
            gateway
                .insert_task(dag_id, &task.name, &script_path, &task.dependencies)
                .await
        }
    }
}
