//! Task data model for the per-iteration task graph.
//!
//! Tasks are the atomic units of work handed to worker agents. Each task
//! tracks its status, assigned agent, dependencies and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::truncate_chars;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// Transitions are monotonic: `Pending -> Running -> {Done, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for its dependencies.
    #[default]
    Pending,
    /// Handed to an agent.
    Running,
    /// Agent returned output.
    Done,
    /// Agent call failed; the error text is stored as the output.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Done => write!(f, "DONE"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single task in the task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Task that spawned this one (None for the root). Display only.
    pub parent_id: Option<TaskId>,
    /// Instruction for the assigned agent.
    pub description: String,
    /// Registry name of the agent that runs this task.
    pub assigned_agent: String,
    /// Current execution status.
    pub status: TaskStatus,
    /// Tasks that must be Done before this one may run.
    pub depends_on: Vec<TaskId>,
    /// Full agent response (Done) or error text (Failed).
    pub output: Option<String>,
    /// Bounded excerpt of `output` handed to dependents.
    pub summary: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with a freshly minted id.
    pub fn new(description: &str, assigned_agent: &str) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            description: description.to_string(),
            assigned_agent: assigned_agent.to_string(),
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            output: None,
            summary: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Set the spawning task.
    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, depends_on: Vec<TaskId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    fn transition_error(&self, to: TaskStatus) -> Error {
        Error::InvalidTransition {
            task: self.id.short(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// Pending -> Running.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Done, storing the output and a summary of at most
    /// `summary_chars` characters.
    pub fn complete(&mut self, output: String, summary_chars: usize) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Done));
        }
        self.summary = Some(truncate_chars(&output, summary_chars));
        self.output = Some(output);
        self.status = TaskStatus::Done;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed, capturing the error text as the output.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.transition_error(TaskStatus::Failed));
        }
        self.output = Some(error.to_string());
        self.summary = None;
        self.status = TaskStatus::Failed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Check if the task is in a terminal state (Done or Failed).
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Summary if present, otherwise the output, otherwise a placeholder.
    pub fn result_excerpt(&self) -> &str {
        self.summary
            .as_deref()
            .or(self.output.as_deref())
            .unwrap_or("No output")
    }
}
