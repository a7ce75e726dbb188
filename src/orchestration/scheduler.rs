//! Sequential scheduler for one iteration's task graph.
//!
//! Each scan snapshots the ready set (pending tasks whose dependencies are
//! all Done) and runs those tasks one at a time in creation order. Scans
//! repeat until nothing is ready or the step budget is spent. A task's
//! failure is recorded on the task; it never aborts the scan.

use tokio::sync::mpsc;

use crate::agent::AgentRegistry;
use crate::core::{Task, TaskGraph, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::util::truncate_chars;
use crate::{mlog, mlog_debug, mlog_warn};

/// Events emitted by the scheduler for task lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task has been handed to its agent.
    TaskStarted { task_id: TaskId, agent: String },
    /// A task's agent returned output.
    TaskCompleted { task_id: TaskId },
    /// A task's agent call failed.
    TaskFailed { task_id: TaskId, error: String },
    /// A pending task will not run in this graph.
    TaskBlocked { task_id: TaskId, reason: BlockReason },
    /// No task is ready any more.
    Settled { steps: u32 },
    /// The step budget ran out while tasks were still ready.
    BudgetExhausted { steps: u32 },
}

/// Why a pending task was left unexecuted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// These failed tasks sit upstream of it.
    FailedDependency(Vec<TaskId>),
    /// It could still have run, but the step budget ran out first.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTask {
    pub id: TaskId,
    pub reason: BlockReason,
}

/// What a scheduler run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Scans that ran at least one task.
    pub steps: u32,
    pub settled: bool,
    pub budget_exhausted: bool,
    pub blocked: Vec<BlockedTask>,
}

/// Build the context an agent sees for a task: the task itself plus the
/// summaries of its dependencies.
pub fn build_context(task: &Task, graph: &TaskGraph) -> String {
    let mut parts = vec![format!("Task: {}\n", task.description)];
    let deps = graph.dependencies(&task.id);
    if !deps.is_empty() {
        parts.push("Dependencies (previous task results):".to_string());
        for dep in deps {
            if dep.status == TaskStatus::Done {
                parts.push(format!("\n- {}", dep.description));
                parts.push(format!("  Result: {}", dep.result_excerpt()));
            }
        }
    }
    parts.join("\n")
}

/// Runs a task graph against an agent registry.
pub struct Scheduler<'a> {
    registry: &'a AgentRegistry,
    max_steps: u32,
    summary_chars: usize,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a AgentRegistry, max_steps: u32, summary_chars: usize) -> Self {
        Self {
            registry,
            max_steps,
            summary_chars,
            event_tx: None,
        }
    }

    /// Emit lifecycle events on `tx`. The receiver must be drained or
    /// dropped; a full channel applies backpressure to the run.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event).await;
        }
    }

    /// Every task's agent must exist before anything runs.
    pub fn check_assignments(&self, graph: &TaskGraph) -> Result<()> {
        for task in graph.tasks() {
            if !self.registry.contains(&task.assigned_agent) {
                return Err(Error::UnknownAgent(task.assigned_agent.clone()));
            }
        }
        Ok(())
    }

    /// Run the graph until it settles or the step budget runs out.
    ///
    /// # Errors
    /// Only construction errors (a task assigned to an unregistered agent)
    /// or broken graph invariants. Agent failures are recorded on tasks.
    pub async fn run(&self, graph: &mut TaskGraph) -> Result<ScheduleReport> {
        self.check_assignments(graph)?;

        let mut report = ScheduleReport::default();
        loop {
            let ready = graph.ready_tasks();
            if ready.is_empty() {
                report.settled = true;
                break;
            }
            if report.steps >= self.max_steps {
                report.budget_exhausted = true;
                break;
            }
            report.steps += 1;
            mlog_debug!("Scan {}: {} ready tasks", report.steps, ready.len());

            for id in ready {
                self.execute(graph, &id).await?;
            }
        }

        if report.settled {
            mlog!(
                "Scheduler settled after {} steps ({} done, {} failed)",
                report.steps,
                graph.count_with_status(TaskStatus::Done),
                graph.count_with_status(TaskStatus::Failed)
            );
            self.emit(SchedulerEvent::Settled { steps: report.steps }).await;
        } else {
            mlog_warn!("Scheduler step budget ({}) exhausted", self.max_steps);
            self.emit(SchedulerEvent::BudgetExhausted { steps: report.steps }).await;
        }

        report.blocked = Self::collect_blocked(graph);
        for blocked in &report.blocked {
            mlog_warn!("Task {} not executed: {:?}", blocked.id.short(), blocked.reason);
            self.emit(SchedulerEvent::TaskBlocked {
                task_id: blocked.id,
                reason: blocked.reason.clone(),
            })
            .await;
        }
        Ok(report)
    }

    fn collect_blocked(graph: &TaskGraph) -> Vec<BlockedTask> {
        let mut blocked: Vec<BlockedTask> = graph
            .blocked_tasks()
            .into_iter()
            .map(|(id, roots)| BlockedTask {
                id,
                reason: BlockReason::FailedDependency(roots),
            })
            .collect();
        for task in graph.tasks() {
            if task.status == TaskStatus::Pending && !blocked.iter().any(|b| b.id == task.id) {
                blocked.push(BlockedTask {
                    id: task.id,
                    reason: BlockReason::Unreachable,
                });
            }
        }
        blocked
    }

    async fn execute(&self, graph: &mut TaskGraph, id: &TaskId) -> Result<()> {
        let (agent_name, context) = {
            let task = graph
                .get_task(id)
                .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", id)))?;
            (task.assigned_agent.clone(), build_context(task, graph))
        };
        let agent = self.registry.get(&agent_name)?;

        graph.start_task(id)?;
        mlog!("Executing task {} with agent {}", id.short(), agent_name);
        self.emit(SchedulerEvent::TaskStarted {
            task_id: *id,
            agent: agent_name.clone(),
        })
        .await;

        match agent.run(id, &context).await {
            Ok(output) => {
                mlog_debug!("Task {} output: {}", id.short(), truncate_chars(&output, 120));
                graph.complete_task(id, output, self.summary_chars)?;
                self.emit(SchedulerEvent::TaskCompleted { task_id: *id }).await;
            }
            Err(e) => {
                let error = e.to_string();
                mlog_warn!("Task {} failed: {}", id.short(), error);
                graph.fail_task(id, &error)?;
                self.emit(SchedulerEvent::TaskFailed {
                    task_id: *id,
                    error,
                })
                .await;
            }
        }
        Ok(())
    }
}
