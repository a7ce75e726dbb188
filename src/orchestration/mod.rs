//! Orchestration layer for maestro.
//!
//! The coordinator authors workers and plans, the scheduler runs each
//! iteration's task graph, and the orchestrator loops until the coordinator
//! is satisfied or the iteration budget runs out.

pub mod coordinator;
pub mod orchestrator;
pub mod prompts;
pub mod scheduler;

pub use coordinator::{
    build_plan, Coordinator, EvaluationVerdict, PlanOutcome, PlanRejection, SubtaskDraft,
};
pub use orchestrator::{IterationRecord, LoopState, Orchestrator, RunOutcome};
pub use prompts::Critique;
pub use scheduler::{
    build_context, BlockReason, BlockedTask, ScheduleReport, Scheduler, SchedulerEvent,
};
