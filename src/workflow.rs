//! Workflow and task domain model.
//!
//! A [`Workflow`] is a named set of tasks with a cron schedule and an
//! intra-workflow dependency graph. Registration is data-in: callers build
//! [`Task`] values and hand them to [`Workflow::add_task`], which enforces
//! the structural rules (dependencies must already be registered, names
//! must be unique, limits must be sane) before the task becomes part of
//! the workflow.

use indexmap::IndexMap;
use snafu::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::schedule::CronSchedule;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid schedule for workflow '{workflow}': {source}"))]
    InvalidSchedule {
        workflow: String,
        source: crate::schedule::Error,
    },

    #[snafu(display(
        "Task '{dependency}' referenced as a dependency of task '{task}' does not exist"
    ))]
    UnknownDependency { task: String, dependency: String },

    #[snafu(display("Task '{task}' is already registered"))]
    DuplicateTask { task: String },

    #[snafu(display("Task '{task}' must allow at least one attempt"))]
    ZeroAttempts { task: String },

    #[snafu(display("Task '{task}' must have a non-zero timeout"))]
    ZeroTimeout { task: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Transient execution state of a task, mirrored in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "success" => Some(TaskStatus::Success),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work: an external script run under a timeout with a
/// bounded number of attempts.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub script_path: PathBuf,
    pub dependencies: Vec<String>,
    /// Total attempts allowed, including the first try. At least 1.
    pub max_attempts: u32,
    pub timeout: Duration,
    pub status: TaskStatus,
}

impl Task {
    /// Build a task with the given limits and pending status.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        script_path: impl Into<PathBuf>,
        dependencies: Vec<String>,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            script_path: script_path.into(),
            dependencies,
            max_attempts,
            timeout,
            status: TaskStatus::Pending,
        }
    }
}

/// A named, scheduled collection of tasks.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    schedule: CronSchedule,
    tasks: IndexMap<String, Task>,
}

impl Workflow {
    /// Create an empty workflow with the given cron expression.
    ///
    /// # Errors
    /// Returns an error if the cron expression is invalid.
    pub fn new(name: impl Into<String>, cron_expression: &str) -> Result<Self> {
        let name = name.into();
        let schedule =
            CronSchedule::parse(cron_expression).context(InvalidScheduleSnafu {
                workflow: name.clone(),
            })?;
        Ok(Self {
            name,
            schedule,
            tasks: IndexMap::new(),
        })
    }

    /// Register a task.
    ///
    /// Every dependency must name a task that is already registered, so
    /// definition files list tasks in dependency order. On rejection the
    /// workflow is left untouched.
    ///
    /// # Errors
    /// Returns an error for an unknown dependency, a duplicate task name,
    /// or invalid limits.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        ensure!(
            !self.tasks.contains_key(&task.name),
            DuplicateTaskSnafu { task: &task.name }
        );
        ensure!(task.max_attempts >= 1, ZeroAttemptsSnafu { task: &task.name });
        ensure!(
            !task.timeout.is_zero(),
            ZeroTimeoutSnafu { task: &task.name }
        );
        for dependency in &task.dependencies {
            ensure!(
                self.tasks.contains_key(dependency),
                UnknownDependencySnafu {
                    task: &task.name,
                    dependency,
                }
            );
        }

        info!(
            workflow = %self.name,
            task = %task.name,
            dependencies = ?task.dependencies,
            "task registered"
        );
        self.tasks.insert(task.name.clone(), task);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// Tasks in registration order.
    #[must_use]
    pub fn tasks(&self) -> &IndexMap<String, Task> {
        &self.tasks
    }

    /// Insert a task bypassing registration checks, to let tests build
    /// shapes `add_task` rejects (such as cycles).
    #[cfg(test)]
    pub(crate) fn insert_task_unchecked(&mut self, task: Task) {
        self.tasks.insert(task.name.clone(), task);
    }
}
