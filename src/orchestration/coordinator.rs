//! The coordinator: worker definition, planning, aggregation and evaluation.
//!
//! Each stage is one request to the completion port. Structured stages go
//! through [`request_structured`], which owns the single JSON-repair retry;
//! this module owns the shapes and what counts as a valid answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::agent::{normalize_agent_name, AgentRegistry, WorkerSpec};
use crate::config::Config;
use crate::core::{Task, TaskGraph, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::llm::{
    request_structured, request_structured_checked, CompletionPort, Message, StructuredResponse,
};
use crate::orchestration::prompts::{self, Critique, SubtaskResult};
use crate::util::truncate_chars;
use crate::{mlog, mlog_debug, mlog_warn};

pub const STAGE_DEFINE_WORKERS: &str = "define_workers";
pub const STAGE_PLAN: &str = "plan_subtasks";
pub const STAGE_AGGREGATE: &str = "aggregate";
pub const STAGE_EVALUATE: &str = "evaluate_result";

#[derive(Debug, Deserialize)]
struct WorkersResponse {
    workers: Vec<WorkerSpec>,
}

impl StructuredResponse for WorkersResponse {
    fn shape_hint() -> &'static str {
        prompts::WORKERS_SHAPE
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.workers.is_empty() {
            return Err("\"workers\" must contain at least one worker".to_string());
        }
        Ok(())
    }
}

impl WorkersResponse {
    /// Names are only checked for workers that survive the `max_workers` cut.
    fn check_names(&self, max_workers: usize) -> std::result::Result<(), String> {
        match self
            .workers
            .iter()
            .take(max_workers)
            .position(|w| normalize_agent_name(&w.name).is_empty())
        {
            Some(i) => Err(format!("worker {} has an empty name", i)),
            None => Ok(()),
        }
    }
}

/// A subtask as the coordinator wrote it, before any ids exist.
#[derive(Debug, Clone, Deserialize)]
pub struct SubtaskDraft {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assigned_agent: String,
    #[serde(default)]
    pub depends_on: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    subtasks: Vec<SubtaskDraft>,
}

impl StructuredResponse for PlanResponse {
    fn shape_hint() -> &'static str {
        prompts::PLAN_SHAPE
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.subtasks.is_empty() {
            return Err("\"subtasks\" must contain at least one subtask".to_string());
        }
        Ok(())
    }
}

/// The coordinator's judgement of an aggregated result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub satisfactory: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub improvements_needed: String,
}

impl StructuredResponse for EvaluationVerdict {
    fn shape_hint() -> &'static str {
        prompts::VERDICT_SHAPE
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.satisfactory && self.improvements_needed.trim().is_empty() {
            return Err(
                "\"improvements_needed\" is required when \"satisfactory\" is false".to_string(),
            );
        }
        Ok(())
    }
}

/// A subtask dropped from the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRejection {
    /// Position of the subtask in the coordinator's plan.
    pub index: usize,
    pub reason: String,
}

/// Result of planning: the graph to run plus whatever was dropped.
#[derive(Debug)]
pub struct PlanOutcome {
    pub graph: TaskGraph,
    pub rejections: Vec<PlanRejection>,
}

/// How a `depends_on` entry refers to another subtask.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DependencyRef {
    Index(usize),
    Id(String),
}

impl DependencyRef {
    fn parse(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(|i| DependencyRef::Index(i as usize))
                .ok_or_else(|| format!("dependency {} is not a valid position", n)),
            Value::String(s) => {
                let s = s.trim();
                match s.parse::<usize>() {
                    Ok(i) => Ok(DependencyRef::Index(i)),
                    Err(_) => Ok(DependencyRef::Id(s.to_string())),
                }
            }
            other => Err(format!("dependency {} is neither a position nor an id", other)),
        }
    }
}

/// Turn validated drafts into a task graph.
///
/// A subtask is rejected on its own, never the whole plan, when its
/// description is blank, its agent is not registered, or a dependency does
/// not name an earlier accepted subtask of the same plan.
pub fn build_plan(
    drafts: &[SubtaskDraft],
    registry: &AgentRegistry,
    root_id: TaskId,
) -> Result<PlanOutcome> {
    let mut graph = TaskGraph::new();
    let mut rejections = Vec::new();
    // Minted id for each accepted subtask, by plan position.
    let mut minted: Vec<Option<TaskId>> = Vec::with_capacity(drafts.len());
    let mut ids_by_text: HashMap<String, usize> = HashMap::new();

    for (index, draft) in drafts.iter().enumerate() {
        match resolve_draft(index, draft, drafts.len(), registry, &minted, &ids_by_text) {
            Ok(depends_on) => {
                let task = Task::new(
                    draft.description.trim(),
                    &normalize_agent_name(&draft.assigned_agent),
                )
                .with_parent(root_id)
                .with_dependencies(depends_on);
                let id = task.id;
                graph.add_task(task)?;
                ids_by_text.insert(id.to_string(), index);
                minted.push(Some(id));
                mlog_debug!(
                    "Planned subtask {} [{}] {}",
                    id.short(),
                    draft.assigned_agent,
                    truncate_chars(&draft.description, 80)
                );
            }
            Err(reason) => {
                mlog_warn!("Planning inconsistency: subtask {} rejected: {}", index, reason);
                rejections.push(PlanRejection { index, reason });
                minted.push(None);
            }
        }
    }

    if graph.is_empty() {
        return Err(Error::Validation(format!(
            "all {} planned subtasks were rejected",
            drafts.len()
        )));
    }
    Ok(PlanOutcome { graph, rejections })
}

fn resolve_draft(
    index: usize,
    draft: &SubtaskDraft,
    plan_len: usize,
    registry: &AgentRegistry,
    minted: &[Option<TaskId>],
    ids_by_text: &HashMap<String, usize>,
) -> std::result::Result<Vec<TaskId>, String> {
    if draft.description.trim().is_empty() {
        return Err("empty description".to_string());
    }
    if !registry.contains(&draft.assigned_agent) {
        return Err(format!(
            "agent '{}' is not one of the defined workers",
            draft.assigned_agent
        ));
    }

    let mut depends_on = Vec::new();
    let mut seen = HashSet::new();
    for value in &draft.depends_on {
        let position = match DependencyRef::parse(value)? {
            DependencyRef::Index(i) if i >= plan_len => {
                return Err(format!("dependency {} is out of range", i));
            }
            DependencyRef::Index(i) if i >= index => {
                return Err(format!("dependency {} does not come earlier in the plan", i));
            }
            DependencyRef::Index(i) => i,
            DependencyRef::Id(id) => *ids_by_text
                .get(&id)
                .ok_or_else(|| format!("dependency '{}' is not a task of this plan", id))?,
        };
        let id = minted
            .get(position)
            .copied()
            .flatten()
            .ok_or_else(|| format!("dependency {} was itself rejected", position))?;
        if seen.insert(id) {
            depends_on.push(id);
        }
    }
    Ok(depends_on)
}

/// One line per subtask for the aggregation request, in creation order.
pub fn collect_results(graph: &TaskGraph, excerpt_chars: usize) -> Vec<SubtaskResult> {
    let blocked: HashSet<TaskId> = graph.blocked_tasks().into_iter().map(|(id, _)| id).collect();
    graph
        .tasks()
        .into_iter()
        .map(|task| {
            let description = task.description.clone();
            match task.status {
                TaskStatus::Done => SubtaskResult::Done {
                    description,
                    output: truncate_chars(task.output.as_deref().unwrap_or_default(), excerpt_chars),
                },
                TaskStatus::Failed => SubtaskResult::Failed {
                    description,
                    error: task.output.clone().unwrap_or_default(),
                },
                _ if blocked.contains(&task.id) => SubtaskResult::NotExecuted {
                    description,
                    reason: "blocked by a failed dependency".to_string(),
                },
                _ => SubtaskResult::NotExecuted {
                    description,
                    reason: "not reached within the step budget".to_string(),
                },
            }
        })
        .collect()
}

/// The privileged planning role.
pub struct Coordinator {
    port: Arc<dyn CompletionPort>,
    model: String,
    system_prompt: String,
    max_workers: usize,
    aggregate_excerpt_chars: usize,
}

impl Coordinator {
    pub fn new(port: Arc<dyn CompletionPort>, config: &Config) -> Self {
        Self {
            port,
            model: config.model.clone(),
            system_prompt: prompts::coordinator_system_prompt(config.max_workers),
            max_workers: config.max_workers,
            aggregate_excerpt_chars: config.aggregate_excerpt_chars,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn port(&self) -> Arc<dyn CompletionPort> {
        Arc::clone(&self.port)
    }

    fn conversation(&self, request: String) -> Vec<Message> {
        vec![
            Message::system(self.system_prompt.as_str()),
            Message::user(request),
        ]
    }

    /// Ask for 1 to `max_workers` worker specs.
    pub async fn define_workers(
        &self,
        prompt: &str,
        critique: Option<&Critique>,
    ) -> Result<Vec<WorkerSpec>> {
        mlog!("Coordinator defining worker agents");
        let messages = self.conversation(prompts::define_workers_request(
            prompt,
            critique,
            self.max_workers,
        ));
        let max_workers = self.max_workers;
        let response: WorkersResponse = request_structured_checked(
            self.port.as_ref(),
            &messages,
            &self.model,
            STAGE_DEFINE_WORKERS,
            |r: &WorkersResponse| r.check_names(max_workers),
        )
        .await?;

        let mut workers = response.workers;
        if workers.len() > self.max_workers {
            mlog_warn!(
                "Coordinator defined {} workers, limiting to {}",
                workers.len(),
                self.max_workers
            );
            workers.truncate(self.max_workers);
        }
        for worker in &mut workers {
            worker.name = normalize_agent_name(&worker.name);
            if worker.system_prompt.trim().is_empty() {
                worker.system_prompt = format!("You are {}. {}", worker.name, worker.role);
            }
        }
        mlog!(
            "Defined {} workers: {}",
            workers.len(),
            workers
                .iter()
                .map(|w| w.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(workers)
    }

    /// Ask for a plan and build this iteration's task graph from it.
    pub async fn plan_subtasks(
        &self,
        prompt: &str,
        registry: &AgentRegistry,
        critique: Option<&Critique>,
        root_id: TaskId,
    ) -> Result<PlanOutcome> {
        mlog!("Coordinator planning subtasks for root task {}", root_id.short());
        let messages = self.conversation(prompts::plan_request(prompt, registry, critique));
        let response: PlanResponse =
            request_structured(self.port.as_ref(), &messages, &self.model, STAGE_PLAN).await?;

        let outcome = build_plan(&response.subtasks, registry, root_id)?;
        mlog!(
            "Planned {} subtasks ({} rejected)",
            outcome.graph.task_count(),
            outcome.rejections.len()
        );
        Ok(outcome)
    }

    /// Synthesize one answer from every subtask's outcome.
    pub async fn aggregate(&self, prompt: &str, graph: &TaskGraph) -> Result<String> {
        if graph.is_empty() {
            return Err(Error::Validation("nothing to aggregate".to_string()));
        }
        let results = collect_results(graph, self.aggregate_excerpt_chars);
        mlog!(
            "Coordinator aggregating {} subtask results ({} done)",
            results.len(),
            graph.count_with_status(TaskStatus::Done)
        );
        let messages = self.conversation(prompts::aggregate_request(prompt, &results));
        self.port.complete(&messages, &self.model).await
    }

    /// Judge an aggregated result.
    pub async fn evaluate_result(&self, prompt: &str, result: &str) -> Result<EvaluationVerdict> {
        mlog!("Coordinator evaluating result quality");
        let messages = self.conversation(prompts::evaluate_request(prompt, result));
        let verdict: EvaluationVerdict =
            request_structured(self.port.as_ref(), &messages, &self.model, STAGE_EVALUATE).await?;
        mlog!(
            "Evaluation: {}",
            if verdict.satisfactory {
                "satisfactory"
            } else {
                "needs improvement"
            }
        );
        mlog_debug!("Reasoning: {}", verdict.reasoning);
        Ok(verdict)
    }
}
