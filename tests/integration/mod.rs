//! Integration tests for maestro.
//!
//! These drive the scheduler and the full iteration loop through scripted
//! completion ports; no model backend is contacted.

mod fixtures;
mod orchestrator_e2e;
