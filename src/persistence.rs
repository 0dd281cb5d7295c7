//! Persistence gateway contract.
//!
//! Every durable record (workflows, tasks, attempts) is owned by a
//! [`PersistenceGateway`] implementation; the rest of the system only
//! talks to the store through these operations. Each operation is a
//! single committed unit. Store errors are returned typed and are never
//! retried here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::workflow::TaskStatus;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Database error: {message}"))]
    Database { message: String },

    #[snafu(display("Attempt {attempt_id} is already finalized"))]
    AlreadyFinalized { attempt_id: i64 },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal outcome of one supervised task within a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Success,
    Failed,
}

impl TerminalStatus {
    #[must_use]
    pub fn as_task_status(self) -> TaskStatus {
        match self {
            TerminalStatus::Success => TaskStatus::Success,
            TerminalStatus::Failed => TaskStatus::Failed,
        }
    }
}

/// One row of the `executions` table.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub id: i64,
    pub dag_id: i64,
    pub task_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

/// Comma-joined dependency list as stored in the `tasks.dependencies`
/// column.
#[must_use]
pub fn join_dependencies(dependencies: &[String]) -> String {
    dependencies.join(",")
}

/// Typed read/write access to the relational store.
///
/// Implementations must be safe to call from concurrent workers; writes
/// to a single attempt row are serialized by the conditional update in
/// [`finalize_attempt`](PersistenceGateway::finalize_attempt).
#[async_trait]
pub trait PersistenceGateway: Send + Sync + std::fmt::Debug {
    /// Create the schema if absent. Safe to invoke repeatedly.
    async fn ensure_schema(&self) -> Result<()>;

    /// Return the id of the workflow record with this name, creating it
    /// if missing. Idempotent.
    async fn upsert_workflow(&self, name: &str) -> Result<i64>;

    async fn find_task(&self, dag_id: i64, name: &str) -> Result<Option<i64>>;

    /// Insert a task record with pending status.
    async fn insert_task(
        &self,
        dag_id: i64,
        name: &str,
        script_path: &str,
        dependencies: &[String],
    ) -> Result<i64>;

    /// Refresh the script path and dependency set of an existing task
    /// record after its source definition changed.
    async fn refresh_task(
        &self,
        task_id: i64,
        script_path: &str,
        dependencies: &[String],
    ) -> Result<()>;

    /// Open an attempt with running status; returns the attempt id.
    async fn begin_attempt(
        &self,
        dag_id: i64,
        task_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<i64>;

    /// Seal an attempt. Fails with [`Error::AlreadyFinalized`] if the
    /// attempt is no longer running.
    async fn finalize_attempt(
        &self,
        attempt_id: i64,
        end_time: DateTime<Utc>,
        status: TerminalStatus,
    ) -> Result<()>;

    /// All attempt rows for a workflow, oldest first.
    async fn attempts_for_workflow(&self, dag_id: i64) -> Result<Vec<AttemptRecord>>;
}
