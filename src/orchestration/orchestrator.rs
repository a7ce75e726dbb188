//! The top-level iteration loop.
//!
//! ```text
//! Iterating(k) --satisfactory--------------------> DoneSatisfactory
//! Iterating(k) --unsatisfactory, k < K-----------> Iterating(k + 1)
//! Iterating(k) --unsatisfactory, k == K----------> DoneExhausted
//! Iterating(k) --stage failure, earlier record---> DoneExhausted
//! Iterating(k) --stage failure, no record--------> DoneFailed
//! ```
//!
//! A failed iteration is discarded; its partial graph never reaches the
//! returned answer.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::agent::{AgentRegistry, WorkerSpec};
use crate::config::Config;
use crate::core::{TaskGraph, TaskId};
use crate::error::{Error, Result};
use crate::llm::CompletionPort;
use crate::orchestration::coordinator::{Coordinator, EvaluationVerdict, PlanRejection};
use crate::orchestration::prompts::Critique;
use crate::orchestration::scheduler::{ScheduleReport, Scheduler, SchedulerEvent};
use crate::run::{IterationPhase, IterationState, PhaseHistoryEntry, RunId, RunStatus};
use crate::{mlog, mlog_error, mlog_warn};

/// Top-level loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Iterating(u32),
    DoneSatisfactory,
    DoneExhausted,
    DoneFailed,
}

/// Everything one completed iteration produced.
#[derive(Debug)]
pub struct IterationRecord {
    pub iteration: u32,
    pub worker_specs: Vec<WorkerSpec>,
    pub graph: TaskGraph,
    pub rejections: Vec<PlanRejection>,
    pub schedule: ScheduleReport,
    pub aggregated_result: String,
    pub verdict: EvaluationVerdict,
    pub phases: Vec<PhaseHistoryEntry>,
}

/// The result of a whole run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub root_id: TaskId,
    pub status: RunStatus,
    /// Final answer. `None` only when the run failed.
    pub answer: Option<String>,
    pub iterations: Vec<IterationRecord>,
    /// Why the answer is not a satisfactory one, when it isn't.
    pub note: Option<String>,
    /// The stage failure that ended the run early, if any.
    pub failure: Option<Error>,
}

impl RunOutcome {
    pub fn last_iteration(&self) -> Option<&IterationRecord> {
        self.iterations.last()
    }
}

/// Drives define -> plan -> execute -> aggregate -> evaluate until the
/// coordinator is satisfied or the iteration budget is spent.
pub struct Orchestrator {
    coordinator: Coordinator,
    config: Config,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Orchestrator {
    pub fn new(port: Arc<dyn CompletionPort>, config: Config) -> Self {
        Self {
            coordinator: Coordinator::new(port, &config),
            config,
            event_tx: None,
        }
    }

    /// Forward scheduler events from every iteration to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self, prompt: &str) -> RunOutcome {
        let run_id = RunId::new();
        let root_id = TaskId::new();
        let max_iterations = self.config.max_iterations;
        mlog!(
            "Run {} started (root task {}, up to {} iterations)",
            run_id.short(),
            root_id.short(),
            max_iterations
        );

        let mut records: Vec<IterationRecord> = Vec::new();
        let mut critique: Option<Critique> = None;
        let mut failure: Option<Error> = None;
        let mut state = LoopState::Iterating(1);

        while let LoopState::Iterating(k) = state {
            mlog!("Iteration {}/{}", k, max_iterations);
            match self.run_iteration(k, prompt, root_id, critique.as_ref()).await {
                Ok(record) => {
                    state = if record.verdict.satisfactory {
                        LoopState::DoneSatisfactory
                    } else if k >= max_iterations {
                        LoopState::DoneExhausted
                    } else {
                        mlog!("Iteration {} unsatisfactory: {}", k, record.verdict.improvements_needed);
                        critique = Some(Critique::new(
                            k,
                            &record.aggregated_result,
                            &record.verdict.improvements_needed,
                            self.config.critique_excerpt_chars,
                        ));
                        LoopState::Iterating(k + 1)
                    };
                    records.push(record);
                }
                Err(e) => {
                    mlog_error!("Iteration {} failed: {}", k, e);
                    failure = Some(e);
                    state = if records.is_empty() {
                        LoopState::DoneFailed
                    } else {
                        LoopState::DoneExhausted
                    };
                }
            }
        }

        let last = records.last();
        let (status, note) = match state {
            LoopState::DoneSatisfactory => (RunStatus::Satisfactory, None),
            LoopState::DoneExhausted => {
                let note = match (&failure, last) {
                    (Some(e), Some(record)) => format!(
                        "Iteration {} failed ({}); returning the unsatisfactory result of iteration {}",
                        record.iteration + 1,
                        e,
                        record.iteration
                    ),
                    _ => format!(
                        "No satisfactory result after {} iterations; returning the last result",
                        max_iterations
                    ),
                };
                mlog_warn!("{}", note);
                (RunStatus::Exhausted, Some(note))
            }
            _ => (RunStatus::Failed, None),
        };
        let answer = last.map(|r| r.aggregated_result.clone());

        mlog!(
            "Run {} finished: {} after {} iterations",
            run_id.short(),
            status,
            records.len()
        );
        RunOutcome {
            run_id,
            root_id,
            status,
            answer,
            iterations: records,
            note,
            failure,
        }
    }

    async fn run_iteration(
        &self,
        iteration: u32,
        prompt: &str,
        root_id: TaskId,
        critique: Option<&Critique>,
    ) -> Result<IterationRecord> {
        let mut state = IterationState::new(iteration);
        let fail = |phase: IterationPhase| move |e: Error| Error::stage(phase.stage_name(), e);

        let worker_specs = self
            .coordinator
            .define_workers(prompt, critique)
            .await
            .map_err(fail(IterationPhase::DefiningWorkers))?;
        let registry =
            AgentRegistry::from_specs(&worker_specs, self.coordinator.model(), self.coordinator.port());

        state.transition(IterationPhase::Planning)?;
        let plan = self
            .coordinator
            .plan_subtasks(prompt, &registry, critique, root_id)
            .await
            .map_err(fail(IterationPhase::Planning))?;
        let mut graph = plan.graph;

        state.transition(IterationPhase::Executing)?;
        let mut scheduler = Scheduler::new(
            &registry,
            self.config.max_scheduler_steps,
            self.config.summary_chars,
        );
        if let Some(tx) = &self.event_tx {
            scheduler = scheduler.with_events(tx.clone());
        }
        let schedule = scheduler
            .run(&mut graph)
            .await
            .map_err(fail(IterationPhase::Executing))?;

        state.transition(IterationPhase::Aggregating)?;
        let aggregated_result = self
            .coordinator
            .aggregate(prompt, &graph)
            .await
            .map_err(fail(IterationPhase::Aggregating))?;

        state.transition(IterationPhase::Evaluating)?;
        let verdict = self
            .coordinator
            .evaluate_result(prompt, &aggregated_result)
            .await
            .map_err(fail(IterationPhase::Evaluating))?;

        state.transition(IterationPhase::Complete)?;
        Ok(IterationRecord {
            iteration,
            worker_specs,
            graph,
            rejections: plan.rejections,
            schedule,
            aggregated_result,
            verdict,
            phases: state.into_history(),
        })
    }
}
