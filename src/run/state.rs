//! Iteration state with phase transition validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::IterationPhase;

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: IterationPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks one iteration's progress and enforces the stage order:
///
/// DefiningWorkers -> Planning -> Executing -> Aggregating -> Evaluating -> Complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    iteration: u32,
    phase: IterationPhase,
    phase_history: Vec<PhaseHistoryEntry>,
}

impl IterationState {
    /// Start iteration `iteration` (1-based) in `DefiningWorkers`.
    pub fn new(iteration: u32) -> Self {
        Self {
            iteration,
            phase: IterationPhase::DefiningWorkers,
            phase_history: vec![PhaseHistoryEntry {
                phase: IterationPhase::DefiningWorkers,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Check if a transition to the target phase is valid from the current phase.
    pub fn can_transition(&self, target: IterationPhase) -> bool {
        matches!(
            (self.phase, target),
            (IterationPhase::DefiningWorkers, IterationPhase::Planning)
                | (IterationPhase::Planning, IterationPhase::Executing)
                | (IterationPhase::Executing, IterationPhase::Aggregating)
                | (IterationPhase::Aggregating, IterationPhase::Evaluating)
                | (IterationPhase::Evaluating, IterationPhase::Complete)
        )
    }

    /// Move to the next phase.
    pub fn transition(&mut self, target: IterationPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        self.phase = target;
        self.phase_history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    pub fn current_phase(&self) -> IterationPhase {
        self.phase
    }

    /// Get the history of all phases visited, in order.
    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        &self.phase_history
    }

    pub fn into_history(self) -> Vec<PhaseHistoryEntry> {
        self.phase_history
    }
}
