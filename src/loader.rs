//! Workflow definition discovery and hot reload.
//!
//! The loader scans a directory for declarative YAML definition files,
//! builds [`Workflow`] values through the registration API, and maintains
//! the registry of active workflows with their next-fire instants. It is
//! the registry's sole writer and runs on the driver task between
//! firings, so readers never observe a half-updated entry. A file whose
//! mtime advances replaces the in-memory workflow from the next firing
//! onward; a file that fails to load is skipped without touching whatever
//! was previously registered from it.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::persistence::PersistenceGateway;
use crate::workflow::{self, Task, Workflow};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("Invalid definition in {}: {source}", path.display()))]
    Definition {
        path: PathBuf,
        source: workflow::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    60
}

/// Declarative shape of one task in a definition file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDefinition {
    pub name: String,
    pub script: PathBuf,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Total attempts, including the first try.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Declarative shape of a workflow definition file.
///
/// Tasks are registered in file order, so a dependency must be listed
/// before any task that references it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    pub name: String,
    pub schedule: String,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    /// Build the in-memory workflow, running every registration check.
    ///
    /// # Errors
    /// Returns an error if the schedule or any task is invalid.
    pub fn into_workflow(self) -> workflow::Result<Workflow> {
        let mut built = Workflow::new(self.name, &self.schedule)?;
        for task in self.tasks {
            built.add_task(Task::new(
                task.name,
                task.script,
                task.dependencies,
                task.max_attempts,
                Duration::from_secs(task.timeout_secs),
            ))?;
        }
        Ok(built)
    }
}

/// One active workflow with its scheduling state.
#[derive(Debug)]
pub struct RegistryEntry {
    pub workflow: Workflow,
    pub next_fire: DateTime<Utc>,
    mtime: SystemTime,
}

/// Maintains the active registry of workflows sourced from a directory.
#[derive(Debug)]
pub struct WorkflowLoader {
    directory: PathBuf,
    gateway: Arc<dyn PersistenceGateway>,
    registry: HashMap<String, RegistryEntry>,
}

impl WorkflowLoader {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            directory: directory.into(),
            gateway,
            registry: HashMap::new(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.registry.get(name)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut RegistryEntry> {
        self.registry.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Scan the definition directory once.
    ///
    /// Entries whose source files have disappeared are retained until
    /// restart; only a changed file replaces a registered workflow.
    pub async fn scan(&mut self, now: DateTime<Utc>) {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    directory = %self.directory.display(),
                    error = %e,
                    "failed to read definition directory"
                );
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_definition_file(&path) {
                continue;
            }
            let mtime = match entry.metadata().and_then(|m| m.modified()) {
                Ok(mtime) => mtime,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to stat definition file");
                    continue;
                }
            };
            match load_definition(&path) {
                Ok(workflow) => self.register(workflow, mtime, now).await,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping definition file");
                }
            }
        }
    }

    async fn register(&mut self, workflow: Workflow, mtime: SystemTime, now: DateTime<Utc>) {
        let name = workflow.name().to_string();

        if let Some(entry) = self.registry.get_mut(&name) {
            if mtime <= entry.mtime {
                return;
            }
            let Some(next_fire) = workflow.schedule().next_after(now) else {
                warn!(workflow = %name, "schedule never fires again, keeping old definition");
                return;
            };
            info!(workflow = %name, %next_fire, "definition changed, reloaded");
            entry.workflow = workflow;
            entry.mtime = mtime;
            entry.next_fire = next_fire;
            return;
        }

        // First observation: the durable record must exist before any
        // task or attempt rows can reference it.
        if let Err(e) = self.gateway.upsert_workflow(&name).await {
            warn!(
                workflow = %name,
                error = %e,
                "failed to persist workflow record, will retry next scan"
            );
            return;
        }
        let Some(next_fire) = workflow.schedule().next_after(now) else {
            warn!(workflow = %name, "schedule never fires again, not registering");
            return;
        };
        info!(workflow = %name, %next_fire, "workflow registered");
        self.registry.insert(
            name,
            RegistryEntry {
                workflow,
                next_fire,
                mtime,
            },
        );
    }
}

/// Definition convention: a non-hidden `.yaml`/`.yml` file whose name
/// does not begin with `__`.
fn is_definition_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with("__") {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn load_definition(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path).context(IoSnafu { path })?;
    let definition: WorkflowDefinition =
        serde_yaml::from_str(&content).context(ParseSnafu { path })?;
    definition.into_workflow().context(DefinitionSnafu { path })
}
