//! Child-process execution of task scripts.
//!
//! The runner is the only component that touches the host process table.
//! It spawns one child per attempt, inheriting the scheduler's working
//! directory and environment, waits up to the task's timeout, and
//! classifies the exit. It writes no attempt records; bookkeeping belongs
//! to the retry wrapper.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::workflow::Task;

/// How long a timed-out child gets to exit after SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Result of running one attempt of a task.
#[derive(Debug)]
pub enum Outcome {
    Success,
    Failed(Failure),
}

/// Why an attempt failed.
#[derive(Debug)]
pub enum Failure {
    Timeout { limit: Duration },
    NonZeroExit { code: Option<i32> },
    SpawnError { message: String },
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Timeout { limit } => {
                write!(f, "timed out after {}s", limit.as_secs())
            }
            Failure::NonZeroExit { code: Some(code) } => {
                write!(f, "exited with code {code}")
            }
            Failure::NonZeroExit { code: None } => {
                write!(f, "terminated by signal")
            }
            Failure::SpawnError { message } => write!(f, "failed to spawn: {message}"),
        }
    }
}

/// Spawns task scripts as isolated child processes.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    venv_root: PathBuf,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            venv_root: PathBuf::from("venvs"),
        }
    }

    #[must_use]
    pub fn with_venv_root(venv_root: impl Into<PathBuf>) -> Self {
        Self {
            venv_root: venv_root.into(),
        }
    }

    /// Run one attempt of `task`, bounded by its timeout.
    pub async fn run(&self, task: &Task) -> Outcome {
        let mut command = match self.build_command(task).await {
            Ok(command) => command,
            Err(failure) => return Outcome::Failed(failure),
        };
        command.stdin(Stdio::null());

        debug!(task = %task.name, script = %task.script_path.display(), "spawning task");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Outcome::Failed(Failure::SpawnError {
                    message: e.to_string(),
                });
            }
        };

        match tokio::time::timeout(task.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Outcome::Success,
            Ok(Ok(status)) => Outcome::Failed(Failure::NonZeroExit {
                code: status.code(),
            }),
            Ok(Err(e)) => Outcome::Failed(Failure::SpawnError {
                message: format!("wait failed: {e}"),
            }),
            Err(_) => {
                warn!(
                    task = %task.name,
                    timeout_secs = task.timeout.as_secs(),
                    "task exceeded its timeout, terminating"
                );
                terminate(child).await;
                Outcome::Failed(Failure::Timeout {
                    limit: task.timeout,
                })
            }
        }
    }

    /// Build the command for a task's script.
    ///
    /// Python scripts run under a per-task interpreter rooted at
    /// `<venv_root>/<task_name>/`, prepared lazily on first invocation.
    /// Anything else runs directly as an executable.
    async fn build_command(&self, task: &Task) -> Result<Command, Failure> {
        let is_python = task
            .script_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "py");

        if !is_python {
            return Ok(Command::new(&task.script_path));
        }

        let venv_dir = self.venv_root.join(&task.name);
        ensure_venv(&task.name, &venv_dir).await?;

        let python = if cfg!(windows) {
            venv_dir.join("Scripts").join("python.exe")
        } else {
            venv_dir.join("bin").join("python")
        };
        let mut command = Command::new(python);
        command.arg(&task.script_path);
        Ok(command)
    }
}

/// Create the task's virtual environment if it does not exist yet.
async fn ensure_venv(task_name: &str, venv_dir: &Path) -> Result<(), Failure> {
    if venv_dir.exists() {
        return Ok(());
    }

    info!(task = %task_name, venv = %venv_dir.display(), "preparing virtual environment");
    let status = Command::new("python3")
        .arg("-m")
        .arg("venv")
        .arg(venv_dir)
        .status()
        .await
        .map_err(|e| Failure::SpawnError {
            message: format!("venv setup failed: {e}"),
        })?;

    if !status.success() {
        return Err(Failure::SpawnError {
            message: format!("venv setup exited with {status}"),
        });
    }

    Ok(())
}

/// SIGTERM, a short grace window, then SIGKILL.
async fn terminate(mut child: Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Try to allow a clean shutdown first.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }

    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed-out child");
    }
}
