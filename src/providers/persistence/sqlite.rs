use crate::persistence::{
    AttemptRecord, Error, PersistenceGateway, Result, TerminalStatus, join_dependencies,
};
use crate::workflow::TaskStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

#[derive(Debug)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Create a new SQLite gateway.
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:dev.db" or "sqlite::memory:")
    ///
    /// The database file is created if missing.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Database {
                message: format!("Invalid SQLite url '{database_url}': {e}"),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database {
                message: format!("Failed to connect to SQLite: {e}"),
            })?;

        Ok(Self { pool })
    }

    /// Create a new SQLite gateway over an existing pool.
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn ensure_schema(&self) -> Result<()> {
        let schema_sql = include_str!("./sql/schema_sqlite.sql");
        for statement in schema_sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Database {
                    message: format!("Failed to execute schema statement: {e}"),
                })?;
        }

        Ok(())
    }

    async fn upsert_workflow(&self, name: &str) -> Result<i64> {
        sqlx::query("INSERT INTO dags (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database {
                message: format!("Failed to upsert workflow '{name}': {e}"),
            })?;

        sqlx::query_scalar("SELECT id FROM dags WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database {
                message: format!("Failed to read workflow id for '{name}': {e}"),
            })
    }

    async fn find_task(&self, dag_id: i64, name: &str) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT id FROM tasks WHERE dag_id = ? AND name = ?")
            .bind(dag_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database {
                message: format!("Failed to find task '{name}': {e}"),
            })
    }

    async fn insert_task(
        &self,
        dag_id: i64,
        name: &str,
        script_path: &str,
        dependencies: &[String],
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO tasks (name, script_path, dependencies, status, dag_id) \
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(name)
        .bind(script_path)
        .bind(join_dependencies(dependencies))
        .bind(dag_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database {
            message: format!("Failed to insert task '{name}': {e}"),
        })?;

        Ok(result.last_insert_rowid())
    }

    async fn refresh_task(
        &self,
        task_id: i64,
        script_path: &str,
        dependencies: &[String],
    ) -> Result<()> {
        sqlx::query("UPDATE tasks SET script_path = ?, dependencies = ? WHERE id = ?")
            .bind(script_path)
            .bind(join_dependencies(dependencies))
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database {
                message: format!("Failed to refresh task {task_id}: {e}"),
            })?;

        Ok(())
    }

    async fn begin_attempt(
        &self,
        dag_id: i64,
        task_id: i64,
        start_time: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO executions (dag_id, task_id, start_time, status) \
             VALUES (?, ?, ?, 'running')",
        )
        .bind(dag_id)
        .bind(task_id)
        .bind(start_time)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database {
            message: format!("Failed to begin attempt for task {task_id}: {e}"),
        })?;

        Ok(result.last_insert_rowid())
    }

    async fn finalize_attempt(
        &self,
        attempt_id: i64,
        end_time: DateTime<Utc>,
        status: TerminalStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE executions SET end_time = ?, status = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(end_time)
        .bind(status.as_task_status().as_str())
        .bind(attempt_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database {
            message: format!("Failed to finalize attempt {attempt_id}: {e}"),
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::AlreadyFinalized { attempt_id });
        }

        Ok(())
    }

    async fn attempts_for_workflow(&self, dag_id: i64) -> Result<Vec<AttemptRecord>> {
        let rows = sqlx::query_as::<
            _,
            (i64, i64, i64, DateTime<Utc>, Option<DateTime<Utc>>, String),
        >(
            "SELECT id, dag_id, task_id, start_time, end_time, status \
             FROM executions WHERE dag_id = ? ORDER BY id ASC",
        )
        .bind(dag_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database {
            message: format!("Failed to list attempts for workflow {dag_id}: {e}"),
        })?;

        rows.into_iter()
            .map(|(id, dag_id, task_id, start_time, end_time, status)| {
                let status = TaskStatus::parse(&status).ok_or_else(|| Error::Database {
                    message: format!("Unknown attempt status '{status}'"),
                })?;
                Ok(AttemptRecord {
                    id,
                    dag_id,
                    task_id,
                    start_time,
                    end_time,
                    status,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_gateway() -> SqliteGateway {
        let gateway = SqliteGateway::new("sqlite::memory:").await.unwrap();
        gateway.ensure_schema().await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn ensure_schema_is_repeatable() {
        let gateway = memory_gateway().await;
        gateway.ensure_schema().await.unwrap();
        gateway.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_workflow_is_idempotent() {
        let gateway = memory_gateway().await;

        let first = gateway.upsert_workflow("etl").await.unwrap();
        let second = gateway.upsert_workflow("etl").await.unwrap();
        assert_eq!(first, second);

        let other = gateway.upsert_workflow("reports").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn task_insert_find_refresh() {
        let gateway = memory_gateway().await;
        let dag_id = gateway.upsert_workflow("etl").await.unwrap();

        assert_eq!(gateway.find_task(dag_id, "extract").await.unwrap(), None);

        let task_id = gateway
            .insert_task(dag_id, "extract", "tasks/extract.sh", &[])
            .await
            .unwrap();
        assert_eq!(
            gateway.find_task(dag_id, "extract").await.unwrap(),
            Some(task_id)
        );

        gateway
            .refresh_task(task_id, "tasks/extract_v2.sh", &["bootstrap".to_string()])
            .await
            .unwrap();
        // Same row, refreshed in place.
        assert_eq!(
            gateway.find_task(dag_id, "extract").await.unwrap(),
            Some(task_id)
        );
    }

    #[tokio::test]
    async fn attempt_lifecycle() {
        let gateway = memory_gateway().await;
        let dag_id = gateway.upsert_workflow("etl").await.unwrap();
        let task_id = gateway
            .insert_task(dag_id, "extract", "tasks/extract.sh", &[])
            .await
            .unwrap();

        let started = Utc::now();
        let attempt_id = gateway
            .begin_attempt(dag_id, task_id, started)
            .await
            .unwrap();

        let attempts = gateway.attempts_for_workflow(dag_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, TaskStatus::Running);
        assert!(attempts[0].end_time.is_none());

        let ended = Utc::now();
        gateway
            .finalize_attempt(attempt_id, ended, TerminalStatus::Success)
            .await
            .unwrap();

        let attempts = gateway.attempts_for_workflow(dag_id).await.unwrap();
        assert_eq!(attempts[0].status, TaskStatus::Success);
        let end_time = attempts[0].end_time.unwrap();
        assert!(end_time >= attempts[0].start_time);
    }

    #[tokio::test]
    async fn finalize_attempt_rejects_double_finalization() {
        let gateway = memory_gateway().await;
        let dag_id = gateway.upsert_workflow("etl").await.unwrap();
        let task_id = gateway
            .insert_task(dag_id, "extract", "tasks/extract.sh", &[])
            .await
            .unwrap();
        let attempt_id = gateway
            .begin_attempt(dag_id, task_id, Utc::now())
            .await
            .unwrap();

        gateway
            .finalize_attempt(attempt_id, Utc::now(), TerminalStatus::Failed)
            .await
            .unwrap();

        let err = gateway
            .finalize_attempt(attempt_id, Utc::now(), TerminalStatus::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyFinalized { .. }));
    }
}
