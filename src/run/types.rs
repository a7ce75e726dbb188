//! Run and iteration type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orchestration::coordinator::{
    STAGE_AGGREGATE, STAGE_DEFINE_WORKERS, STAGE_EVALUATE, STAGE_PLAN,
};

/// Unique identifier for one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new unique run identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stages of one iteration, in the order they run.
///
/// 1. DefiningWorkers - coordinator authors the worker specs
/// 2. Planning - coordinator breaks the prompt into subtasks
/// 3. Executing - scheduler runs the task graph
/// 4. Aggregating - coordinator synthesizes one answer
/// 5. Evaluating - coordinator judges the answer
/// 6. Complete - verdict recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    DefiningWorkers,
    Planning,
    Executing,
    Aggregating,
    Evaluating,
    Complete,
}

impl IterationPhase {
    /// Name of the coordinator stage that runs in this phase, for errors.
    pub fn stage_name(&self) -> &'static str {
        match self {
            IterationPhase::DefiningWorkers => STAGE_DEFINE_WORKERS,
            IterationPhase::Planning => STAGE_PLAN,
            IterationPhase::Executing => "execute",
            IterationPhase::Aggregating => STAGE_AGGREGATE,
            IterationPhase::Evaluating => STAGE_EVALUATE,
            IterationPhase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for IterationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationPhase::DefiningWorkers => write!(f, "defining_workers"),
            IterationPhase::Planning => write!(f, "planning"),
            IterationPhase::Executing => write!(f, "executing"),
            IterationPhase::Aggregating => write!(f, "aggregating"),
            IterationPhase::Evaluating => write!(f, "evaluating"),
            IterationPhase::Complete => write!(f, "complete"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// An iteration's verdict was satisfactory.
    Satisfactory,
    /// Iterations ran out, or a later iteration failed after an earlier one
    /// produced a result. The best available answer is returned.
    Exhausted,
    /// No iteration produced a result.
    Failed,
}

impl RunStatus {
    /// True when the run has an answer to print.
    pub fn has_answer(&self) -> bool {
        !matches!(self, RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Satisfactory => write!(f, "satisfactory"),
            RunStatus::Exhausted => write!(f, "exhausted"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}
