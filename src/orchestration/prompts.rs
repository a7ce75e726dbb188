//! Coordinator prompt templates.
//!
//! Every request starts with a marker line (`WORKER DEFINITION REQUEST`,
//! `PLANNING REQUEST`, `AGGREGATION REQUEST`, `EVALUATION REQUEST`) so a
//! backend, a log reader or a test double can tell the stages apart.

use crate::agent::AgentRegistry;
use crate::util::truncate_chars;

pub const WORKERS_MARKER: &str = "WORKER DEFINITION REQUEST";
pub const PLANNING_MARKER: &str = "PLANNING REQUEST";
pub const AGGREGATION_MARKER: &str = "AGGREGATION REQUEST";
pub const EVALUATION_MARKER: &str = "EVALUATION REQUEST";

pub const WORKERS_SHAPE: &str = r#"{
  "workers": [
    {
      "name": "descriptive_name",
      "role": "Brief role description",
      "system_prompt": "Detailed system prompt with expertise, responsibilities, and style guidelines"
    }
  ]
}"#;

pub const PLAN_SHAPE: &str = r#"{
  "subtasks": [
    {
      "description": "Clear task description",
      "assigned_agent": "worker_name",
      "depends_on": []
    }
  ]
}"#;

pub const VERDICT_SHAPE: &str = r#"{
  "satisfactory": true,
  "reasoning": "Explanation of why the result does or doesn't meet the user's needs",
  "improvements_needed": "Specific areas that need work (required when not satisfactory)"
}"#;

/// System prompt shared by all four coordinator stages.
pub fn coordinator_system_prompt(max_workers: usize) -> String {
    format!(
        "You are a Coordinator Agent in a multi-agent system.\n\
         \n\
         Your responsibilities:\n\
         1. WORKER DEFINITION: Analyze the user's request and define specialized worker agents (up to {max}) that would be most useful.\n\
         2. PLANNING: Break down complex user requests into subtasks for your defined workers.\n\
         3. EVALUATION: Assess if results adequately satisfy the user's original request.\n\
         4. AGGREGATION: Synthesize results from workers into a final coherent answer.\n\
         \n\
         Each worker should have a clear role, expertise area, and purpose.\n\
         \n\
         When defining workers, output JSON ONLY in this format:\n{workers}\n\
         \n\
         When planning subtasks, output JSON ONLY in this format:\n{plan}\n\
         \n\
         When evaluating results, output JSON ONLY in this format:\n{verdict}\n\
         \n\
         When aggregating, produce a clear markdown-formatted final answer.",
        max = max_workers,
        workers = WORKERS_SHAPE,
        plan = PLAN_SHAPE,
        verdict = VERDICT_SHAPE,
    )
}

/// Feedback from the previous iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Critique {
    /// Iteration that produced the feedback.
    pub iteration: u32,
    /// Previous aggregated result, already cut to an excerpt.
    pub previous_result: String,
    pub improvements_needed: String,
}

impl Critique {
    pub fn new(iteration: u32, previous_result: &str, improvements_needed: &str, excerpt_chars: usize) -> Self {
        Self {
            iteration,
            previous_result: truncate_chars(previous_result, excerpt_chars),
            improvements_needed: improvements_needed.trim().to_string(),
        }
    }

    fn render(&self) -> String {
        format!(
            "This is iteration {next}. The result of iteration {prev} did not fully satisfy the user's needs.\n\
             \n\
             Previous result:\n{result}\n\
             \n\
             Feedback on what needs improvement:\n{feedback}\n",
            next = self.iteration + 1,
            prev = self.iteration,
            result = self.previous_result,
            feedback = self.improvements_needed,
        )
    }
}

pub fn define_workers_request(prompt: &str, critique: Option<&Critique>, max_workers: usize) -> String {
    let mut request = format!("{}\n\nUser's goal: {}\n", WORKERS_MARKER, prompt);
    if let Some(critique) = critique {
        request.push('\n');
        request.push_str(&critique.render());
    }
    request.push_str(&format!(
        "\nAnalyze this goal and define 1-{} specialized worker agents that would be most effective.\n\
         Each worker should have a unique expertise area relevant to the task.\n\
         Names must be short identifiers without spaces.\n\
         \n\
         Output JSON ONLY in this format:\n{}",
        max_workers, WORKERS_SHAPE
    ));
    request
}

pub fn plan_request(prompt: &str, registry: &AgentRegistry, critique: Option<&Critique>) -> String {
    let workers = registry
        .agents()
        .map(|agent| format!("- {}: {}", agent.name(), agent.role()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut request = format!(
        "{}\n\nUser's goal: {}\n\nAvailable worker agents:\n{}\n",
        PLANNING_MARKER, prompt, workers
    );
    if let Some(critique) = critique {
        request.push('\n');
        request.push_str(&critique.render());
        request.push_str("\nPlan work that addresses this feedback.\n");
    }
    request.push_str(&format!(
        "\nCreate a plan by breaking this goal into subtasks. Assign each subtask to one of the workers above, \
         using its exact name.\n\
         A subtask may depend on EARLIER subtasks: list their zero-based positions in \"depends_on\".\n\
         \n\
         Output JSON ONLY in this format:\n{}",
        PLAN_SHAPE
    ));
    request
}

/// One line item in the aggregation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtaskResult {
    Done { description: String, output: String },
    Failed { description: String, error: String },
    NotExecuted { description: String, reason: String },
}

impl SubtaskResult {
    fn render(&self) -> String {
        match self {
            SubtaskResult::Done { description, output } => {
                format!("Task: {}\nResult: {}\n", description, output)
            }
            SubtaskResult::Failed { description, error } => {
                format!("Task: {}\nFAILED: {}\n", description, error)
            }
            SubtaskResult::NotExecuted { description, reason } => {
                format!("Task: {}\nNOT EXECUTED: {}\n", description, reason)
            }
        }
    }
}

pub fn aggregate_request(prompt: &str, results: &[SubtaskResult]) -> String {
    let has_gaps = results
        .iter()
        .any(|r| !matches!(r, SubtaskResult::Done { .. }));
    let body = results
        .iter()
        .map(SubtaskResult::render)
        .collect::<Vec<_>>()
        .join("\n");

    let mut request = format!(
        "{}\n\nOriginal user goal: {}\n\nSubtask results:\n\n{}\n\
         Synthesize these results into a final, coherent answer in markdown format.\n\
         Provide a clear, complete response to the user's original goal.",
        AGGREGATION_MARKER, prompt, body
    );
    if has_gaps {
        request.push_str(
            "\nSome subtasks failed or were not executed. Work with what succeeded and do not invent their results.",
        );
    }
    request
}

pub fn evaluate_request(prompt: &str, result: &str) -> String {
    format!(
        "{}\n\nOriginal user goal: {}\n\nCurrent result:\n{}\n\n\
         Evaluate whether this result fully and adequately satisfies the user's original goal.\n\
         Be critical and thorough. Consider:\n\
         - Does it fully address all aspects of the request?\n\
         - Is it sufficiently detailed and accurate?\n\
         - Is the quality high enough?\n\
         - Are there any gaps or weaknesses?\n\
         \n\
         If it is not satisfactory, \"improvements_needed\" must say what to change.\n\
         \n\
         Output JSON ONLY in this format:\n{}",
        EVALUATION_MARKER, prompt, result, VERDICT_SHAPE
    )
}
