//! Per-run and per-iteration state.
//!
//! Nothing here is persisted; a run's state lives exactly as long as the
//! `Orchestrator::run` call that owns it.

mod state;
mod types;

pub use state::{IterationState, PhaseHistoryEntry};
pub use types::{IterationPhase, RunId, RunStatus};
