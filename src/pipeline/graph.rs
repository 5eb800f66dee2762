//! Task graph: named nodes with "must succeed before" edges and a sequential
//! runner.
//!
//! A node runs only when every dependency succeeded; otherwise it is marked
//! skipped. Nodes without a failed ancestor still run, so independent
//! branches do not block each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{ErrorPayload, Result};

// ---

/// One unit of work over a shared run context `C`.
#[async_trait]
pub trait Task<C>: Send + Sync {
    // ---
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut C) -> Result<()>;
}

/// Lifecycle of a single node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Per-node result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    // ---
    pub name: &'static str,
    pub state: TaskState,
    pub error: Option<ErrorPayload>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskReport {
    fn pending(name: &'static str) -> Self {
        Self {
            name,
            state: TaskState::Pending,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Graph construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("task '{0}' registered twice")]
    DuplicateTask(&'static str),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        task: &'static str,
        dependency: &'static str,
    },

    #[error("dependency cycle among tasks: {}", .0.join(", "))]
    Cycle(Vec<&'static str>),
}

struct Node<C> {
    task: Box<dyn Task<C>>,
    deps: Vec<usize>,
}

/// A validated, topologically ordered task graph.
pub struct TaskGraph<C> {
    name: &'static str,
    nodes: Vec<Node<C>>,
    order: Vec<usize>,
}

/// Collects tasks and edges, then validates them in [`build`](Self::build).
pub struct TaskGraphBuilder<C> {
    name: &'static str,
    tasks: Vec<(Box<dyn Task<C>>, Vec<&'static str>)>,
}

impl<C: Send + 'static> TaskGraphBuilder<C> {
    // ---
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Vec::new(),
        }
    }

    /// Add `task`, to run only after every task named in `after` succeeded.
    pub fn task(mut self, task: impl Task<C> + 'static, after: &[&'static str]) -> Self {
        self.tasks.push((Box::new(task), after.to_vec()));
        self
    }

    pub fn build(self) -> std::result::Result<TaskGraph<C>, GraphError> {
        // ---
        let names: Vec<&'static str> = self.tasks.iter().map(|(t, _)| t.name()).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(GraphError::DuplicateTask(*name));
            }
        }

        let mut nodes = Vec::with_capacity(self.tasks.len());
        for (task, after) in self.tasks {
            let deps = after
                .iter()
                .map(|dep| {
                    names
                        .iter()
                        .position(|n| n == dep)
                        .ok_or(GraphError::UnknownDependency {
                            task: task.name(),
                            dependency: *dep,
                        })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            nodes.push(Node { task, deps });
        }

        // Kahn's algorithm, preferring registration order among ready nodes
        let mut indegree: Vec<usize> = nodes.iter().map(|n| n.deps.len()).collect();
        let mut done = vec![false; nodes.len()];
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(next) = (0..nodes.len()).find(|&i| !done[i] && indegree[i] == 0) {
            done[next] = true;
            order.push(next);
            for (i, node) in nodes.iter().enumerate() {
                if node.deps.contains(&next) {
                    indegree[i] -= node.deps.iter().filter(|&&d| d == next).count();
                }
            }
        }

        if order.len() != nodes.len() {
            let stuck = (0..nodes.len())
                .filter(|&i| !done[i])
                .map(|i| names[i])
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(TaskGraph {
            name: self.name,
            nodes,
            order,
        })
    }
}

impl<C: Send + 'static> TaskGraph<C> {
    // ---
    pub fn builder(name: &'static str) -> TaskGraphBuilder<C> {
        TaskGraphBuilder::new(name)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.order.iter().map(|&i| self.nodes[i].task.name()).collect()
    }

    /// Fresh pending reports, one per node, in execution order.
    pub fn pending_reports(&self) -> Vec<TaskReport> {
        self.task_names().into_iter().map(TaskReport::pending).collect()
    }

    /// Execute every node in dependency order against `ctx`.
    ///
    /// Reports come back in execution order. Nothing is retried.
    pub async fn run(&self, ctx: &mut C) -> Vec<TaskReport> {
        // ---
        let mut states = vec![TaskState::Pending; self.nodes.len()];
        let mut reports: Vec<Option<TaskReport>> = (0..self.nodes.len()).map(|_| None).collect();

        for &idx in &self.order {
            let node = &self.nodes[idx];
            let name = node.task.name();
            let mut report = TaskReport::pending(name);

            if node.deps.iter().any(|&d| states[d] != TaskState::Succeeded) {
                warn!(graph = self.name, task = name, "Skipping task; upstream did not succeed");
                states[idx] = TaskState::Skipped;
                report.state = TaskState::Skipped;
                reports[idx] = Some(report);
                continue;
            }

            states[idx] = TaskState::Running;
            report.started_at = Some(Utc::now());
            info!(graph = self.name, task = name, "Task running");

            let span = info_span!("task", graph = self.name, task = name);
            let outcome = node.task.run(ctx).instrument(span).await;
            report.finished_at = Some(Utc::now());

            match outcome {
                Ok(()) => {
                    info!(graph = self.name, task = name, "Task succeeded");
                    states[idx] = TaskState::Succeeded;
                    report.state = TaskState::Succeeded;
                }
                Err(e) => {
                    error!(graph = self.name, task = name, error = %e, "Task failed");
                    states[idx] = TaskState::Failed;
                    report.state = TaskState::Failed;
                    report.error = Some(ErrorPayload::from(&e));
                }
            }
            reports[idx] = Some(report);
        }

        self.order
            .iter()
            .filter_map(|&i| reports[i].take())
            .collect()
    }
}
