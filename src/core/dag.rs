//! Task graph for dependency management.
//!
//! `TaskGraph` holds one iteration's tasks as a directed acyclic graph.
//! Edges point from a dependency to the task that needs it. Tasks may only
//! depend on tasks already present in the same graph, so every graph is
//! acyclic by construction and creation order is a valid topological order.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// The task dependency graph for one iteration.
pub struct TaskGraph {
    /// The underlying directed graph. Nodes are never removed, so node
    /// indices follow creation order.
    graph: DiGraph<Task, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task to the graph.
    ///
    /// Every id in `task.depends_on` must already be in this graph; a
    /// reference to anything else (a stale id from another iteration, or a
    /// task added later) is rejected.
    ///
    /// # Errors
    /// Returns `Error::Validation` for a duplicate id or an unknown dependency.
    pub fn add_task(&mut self, task: Task) -> Result<NodeIndex> {
        if self.task_index.contains_key(&task.id) {
            return Err(Error::Validation(format!(
                "Task {} already exists in graph",
                task.id.short()
            )));
        }

        let mut dep_indices = Vec::with_capacity(task.depends_on.len());
        for dep in &task.depends_on {
            let index = self.task_index.get(dep).ok_or_else(|| {
                Error::Validation(format!(
                    "Task {} depends on {}, which is not in this graph",
                    task.id.short(),
                    dep.short()
                ))
            })?;
            dep_indices.push(*index);
        }

        let id = task.id;
        let index = self.graph.add_node(task);
        for dep_index in dep_indices {
            self.graph.update_edge(dep_index, index, ());
        }
        self.task_index.insert(id, index);
        Ok(index)
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    fn get_task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        let index = *self
            .task_index
            .get(id)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", id)))?;
        self.graph
            .node_weight_mut(index)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", id)))
    }

    /// Get the number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependency edges in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// All tasks in creation order.
    pub fn tasks(&self) -> Vec<&Task> {
        self.graph
            .node_indices()
            .filter_map(|index| self.graph.node_weight(index))
            .collect()
    }

    /// Tasks the given task depends on, in the order listed on the task.
    pub fn dependencies(&self, id: &TaskId) -> Vec<&Task> {
        self.get_task(id)
            .map(|task| {
                task.depends_on
                    .iter()
                    .filter_map(|dep| self.get_task(dep))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tasks that depend on the given task.
    pub fn dependents(&self, id: &TaskId) -> Vec<&Task> {
        let Some(&index) = self.task_index.get(id) else {
            return Vec::new();
        };
        let mut dependents: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        dependents.sort();
        dependents
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }

    // ========== Scheduling Operations ==========

    /// Pending tasks whose dependencies are all Done, in creation order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;
                if task.status != TaskStatus::Pending {
                    return None;
                }
                let deps_done = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|d| d.status == TaskStatus::Done)
                            .unwrap_or(false)
                    });
                deps_done.then_some(task.id)
            })
            .collect()
    }

    /// Move a task to Running.
    ///
    /// # Errors
    /// Fails if the task is unknown, not Pending, or any dependency is not Done.
    pub fn start_task(&mut self, id: &TaskId) -> Result<()> {
        let unmet: Vec<String> = self
            .dependencies(id)
            .into_iter()
            .filter(|dep| dep.status != TaskStatus::Done)
            .map(|dep| dep.id.short())
            .collect();
        if !unmet.is_empty() {
            return Err(Error::Validation(format!(
                "Task {} has unfinished dependencies: {}",
                id.short(),
                unmet.join(", ")
            )));
        }
        self.get_task_mut(id)?.start()
    }

    /// Move a Running task to Done.
    pub fn complete_task(&mut self, id: &TaskId, output: String, summary_chars: usize) -> Result<()> {
        self.get_task_mut(id)?.complete(output, summary_chars)
    }

    /// Move a Running task to Failed.
    pub fn fail_task(&mut self, id: &TaskId, error: &str) -> Result<()> {
        self.get_task_mut(id)?.fail(error)
    }

    /// Pending tasks that can never run because a dependency failed,
    /// directly or through another blocked task.
    ///
    /// Each entry carries the failed tasks at the root of the blockage.
    pub fn blocked_tasks(&self) -> Vec<(TaskId, Vec<TaskId>)> {
        let mut causes: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut blocked = Vec::new();

        // Dependencies always precede dependents in creation order.
        for task in self.tasks() {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let mut roots: Vec<TaskId> = Vec::new();
            let mut seen = HashSet::new();
            for dep in self.dependencies(&task.id) {
                let found: Vec<TaskId> = if dep.status == TaskStatus::Failed {
                    vec![dep.id]
                } else {
                    causes.get(&dep.id).cloned().unwrap_or_default()
                };
                for root in found {
                    if seen.insert(root) {
                        roots.push(root);
                    }
                }
            }
            if !roots.is_empty() {
                causes.insert(task.id, roots.clone());
                blocked.push((task.id, roots));
            }
        }
        blocked
    }

    /// Number of tasks in the given status.
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.graph
            .node_weights()
            .filter(|task| task.status == status)
            .count()
    }

    /// True when nothing is running and no pending task is ready.
    pub fn is_settled(&self) -> bool {
        self.count_with_status(TaskStatus::Running) == 0 && self.ready_tasks().is_empty()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
