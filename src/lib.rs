//! # Magpie - Cron-driven DAG Workflow Orchestrator
//!
//! Magpie discovers workflow definitions on disk, activates each on a
//! cron schedule, and at each firing runs the workflow's tasks in
//! dependency order, executing each task as an isolated child process
//! with bounded retries and a per-task timeout. Execution metadata is
//! persisted to a relational store so history survives restarts.
//!
//! ## Core Modules
//!
//! - [`scheduler`] - The tick driver and cron firing loop
//! - [`loader`] - Definition discovery, parsing, and hot reload
//! - [`engine`] - Topological dispatch over a bounded worker pool
//! - [`retry`] - Per-task attempt supervision
//! - [`runner`] - Child-process execution with timeout
//! - [`persistence`] - The durable store contract
//! - [`providers`] - SQLite and PostgreSQL store backends
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use magpie::engine::ExecutionEngine;
//! use magpie::loader::WorkflowLoader;
//! use magpie::persistence::PersistenceGateway;
//! use magpie::providers::persistence::SqliteGateway;
//! use magpie::runner::TaskRunner;
//! use magpie::scheduler::Scheduler;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway: Arc<dyn PersistenceGateway> =
//!     Arc::new(SqliteGateway::new("sqlite:dev.db").await?);
//! gateway.ensure_schema().await?;
//!
//! let engine = ExecutionEngine::new(Arc::clone(&gateway), TaskRunner::new());
//! let loader = WorkflowLoader::new("dags", gateway);
//!
//! let mut scheduler = Scheduler::new(loader, engine);
//! scheduler.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Definition Files
//!
//! Workflows are declarative YAML, one file per workflow:
//!
//! ```yaml
//! name: example_flow
//! schedule: "*/1 * * * *"
//! tasks:
//!   - name: extract
//!     script: tasks/extract.sh
//!   - name: load
//!     script: tasks/load.sh
//!     dependencies: [extract]
//!     max_attempts: 2
//!     timeout_secs: 120
//! ```
//!
//! ## Configuration
//!
//! The store backend is selected by `ENV` (`development` → SQLite at
//! `SQLITE_DB`, `production` → PostgreSQL at `POSTGRES_*`); a `.env`
//! file is honored. Scheduler settings layer defaults, an optional
//! `magpie.yaml`, `MAGPIE__`-prefixed environment variables, and CLI
//! flags. See [`config::MagpieConfig`].

pub mod cmd;
pub mod config;
pub mod engine;
pub mod loader;
pub mod persistence;
pub mod providers;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod workflow;
