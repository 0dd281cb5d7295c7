//! Topological dispatch of a workflow's tasks over a bounded worker pool.
//!
//! One [`ExecutionEngine::execute`] call is one firing. The dependency
//! graph is checked for cycles up front; ready tasks are handed to worker
//! tasks gated by a semaphore, and completions come back over a channel.
//! The dispatcher alone owns the in-degree table and per-task state, so
//! no graph structure is shared with the workers.

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::persistence::{self, PersistenceGateway, TerminalStatus};
use crate::retry;
use crate::runner::TaskRunner;
use crate::workflow::{Task, Workflow};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Workflow '{workflow}' has a dependency cycle"))]
    CycleDetected { workflow: String },

    #[snafu(display("Store error: {source}"))]
    Store { source: persistence::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Default worker pool width within a firing.
pub const DEFAULT_WORKERS: usize = 5;

/// Dispatcher-side view of one task within a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Skipped,
    Done,
}

/// Executes one workflow firing at a time.
///
/// Distinct workflows may fire concurrently on separate engines or calls,
/// but callers must serialize firings of the same workflow; the driver
/// does so by awaiting each firing on the tick loop.
#[derive(Debug)]
pub struct ExecutionEngine {
    gateway: Arc<dyn PersistenceGateway>,
    runner: TaskRunner,
    workers: usize,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>, runner: TaskRunner) -> Self {
        Self {
            gateway,
            runner,
            workers: DEFAULT_WORKERS,
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Run one firing of `workflow` to completion.
    ///
    /// A failed task does not abort the firing: its transitive
    /// descendants are skipped (producing no attempt rows) while
    /// unaffected branches run to completion. Individual failures are
    /// observable only through attempt records.
    ///
    /// # Errors
    /// Returns an error if the dependency graph has a cycle (before any
    /// task starts) or the workflow record cannot be ensured.
    pub async fn execute(&self, workflow: &Workflow) -> Result<()> {
        let dag_id = self
            .gateway
            .upsert_workflow(workflow.name())
            .await
            .context(StoreSnafu)?;

        let (graph, nodes) = build_graph(workflow)?;

        let mut in_degree: HashMap<String, usize> = workflow
            .tasks()
            .iter()
            .map(|(name, task)| (name.clone(), task.dependencies.len()))
            .collect();
        let mut state: HashMap<String, NodeState> = workflow
            .tasks()
            .keys()
            .map(|name| (name.clone(), NodeState::Pending))
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut running = 0usize;

        info!(
            workflow = %workflow.name(),
            tasks = workflow.tasks().len(),
            "firing workflow"
        );

        for (name, task) in workflow.tasks() {
            if task.dependencies.is_empty() {
                state.insert(name.clone(), NodeState::Running);
                running += 1;
                self.spawn_task(dag_id, task.clone(), tx.clone(), Arc::clone(&semaphore));
            }
        }

        while running > 0 {
            let Some((name, status)) = rx.recv().await else {
                break;
            };
            running -= 1;
            state.insert(name.clone(), NodeState::Done);

            match status {
                TerminalStatus::Success => {
                    for child in children(&graph, &nodes, &name) {
                        let Some(degree) = in_degree.get_mut(&child) else {
                            continue;
                        };
                        *degree = degree.saturating_sub(1);
                        if *degree > 0 || state.get(&child) != Some(&NodeState::Pending) {
                            continue;
                        }
                        if let Some(task) = workflow.tasks().get(&child) {
                            state.insert(child.clone(), NodeState::Running);
                            running += 1;
                            self.spawn_task(
                                dag_id,
                                task.clone(),
                                tx.clone(),
                                Arc::clone(&semaphore),
                            );
                        }
                    }
                }
                TerminalStatus::Failed => {
                    skip_descendants(&graph, &nodes, &name, &mut state);
                }
            }
        }

        info!(workflow = %workflow.name(), "firing complete");
        Ok(())
    }

    /// Hand one task to the worker pool; the completion comes back on
    /// the channel once the retry wrapper reaches a terminal status.
    fn spawn_task(
        &self,
        dag_id: i64,
        task: Task,
        tx: UnboundedSender<(String, TerminalStatus)>,
        semaphore: Arc<Semaphore>,
    ) {
        let gateway = Arc::clone(&self.gateway);
        let runner = self.runner.clone();
        tokio::spawn(async move {
            let status = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    debug!(task = %task.name, "dispatching task");
                    retry::supervise(gateway.as_ref(), &runner, dag_id, &task).await
                }
                // The semaphore lives as long as the firing; closure here
                // means the firing is being torn down.
                Err(_) => TerminalStatus::Failed,
            };
            let _ = tx.send((task.name.clone(), status));
        });
    }
}

/// Build the dependency graph (edge: dependency -> dependent) and verify
/// it is acyclic before anything runs.
fn build_graph(
    workflow: &Workflow,
) -> Result<(DiGraph<String, ()>, HashMap<String, NodeIndex>)> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for name in workflow.tasks().keys() {
        let node = graph.add_node(name.clone());
        nodes.insert(name.clone(), node);
    }

    for (name, task) in workflow.tasks() {
        let Some(&dst) = nodes.get(name) else {
            continue;
        };
        for dependency in &task.dependencies {
            if let Some(&src) = nodes.get(dependency) {
                graph.add_edge(src, dst, ());
            }
        }
    }

    ensure!(
        toposort(&graph, None).is_ok(),
        CycleDetectedSnafu {
            workflow: workflow.name(),
        }
    );

    Ok((graph, nodes))
}

/// Direct dependents of `name`.
fn children(
    graph: &DiGraph<String, ()>,
    nodes: &HashMap<String, NodeIndex>,
    name: &str,
) -> Vec<String> {
    let Some(&node) = nodes.get(name) else {
        return Vec::new();
    };
    graph
        .neighbors_directed(node, Direction::Outgoing)
        .filter_map(|neighbor| graph.node_weight(neighbor).cloned())
        .collect()
}

/// Mark every transitive descendant of a failed task as skipped so it is
/// never dispatched and produces no attempt rows.
fn skip_descendants(
    graph: &DiGraph<String, ()>,
    nodes: &HashMap<String, NodeIndex>,
    failed: &str,
    state: &mut HashMap<String, NodeState>,
) {
    let Some(&start) = nodes.get(failed) else {
        return;
    };

    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        for neighbor in graph.neighbors_directed(node, Direction::Outgoing) {
            let Some(child) = graph.node_weight(neighbor) else {
                continue;
            };
            if state.get(child.as_str()) == Some(&NodeState::Pending) {
                warn!(task = %child, cause = %failed, "skipping dependent of failed task");
                state.insert(child.clone(), NodeState::Skipped);
                stack.push(neighbor);
            }
        }
    }
}
