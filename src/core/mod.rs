//! Core domain models for maestro orchestration.
//!
//! Tasks and the per-iteration task graph they live in.

pub mod dag;
pub mod task;

pub use dag::TaskGraph;
pub use task::{Task, TaskId, TaskStatus};
