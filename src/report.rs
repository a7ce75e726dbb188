//! Human-readable run reports, written to stderr by the CLI.

use crate::core::{TaskGraph, TaskStatus};
use crate::orchestration::RunOutcome;
use crate::run::RunStatus;
use crate::util::shorten;

const RULE_WIDTH: usize = 80;

fn status_marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Done => "✅",
        TaskStatus::Failed => "❌",
        TaskStatus::Running => "⏳",
        TaskStatus::Pending => "⏸️",
    }
}

/// Compact tree of the root prompt and every subtask of one iteration.
pub fn render_task_tree(prompt: &str, graph: &TaskGraph) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = format!("{rule}\nTASK GRAPH\n{rule}\n\n");
    out.push_str(&format!("🎯 ROOT: {}\n", shorten(prompt, 60)));
    out.push_str(&format!(
        "   Subtasks: {} done, {} failed, {} pending\n",
        graph.count_with_status(TaskStatus::Done),
        graph.count_with_status(TaskStatus::Failed),
        graph.count_with_status(TaskStatus::Pending)
    ));

    let tasks = graph.tasks();
    for (i, task) in tasks.iter().enumerate() {
        let prefix = if i + 1 == tasks.len() { "└──" } else { "├──" };
        out.push_str(&format!(
            "   {} {} [{}] {}\n",
            prefix,
            status_marker(task.status),
            task.assigned_agent,
            shorten(&task.description, 50)
        ));
        out.push_str(&format!(
            "       ID: {} | Deps: {}\n",
            task.id.short(),
            task.depends_on.len()
        ));
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

/// One-paragraph summary of how the run ended.
pub fn render_summary(outcome: &RunOutcome) -> String {
    let iterations = outcome.iterations.len();
    let mut out = match outcome.status {
        RunStatus::Satisfactory => format!(
            "Run {}: satisfactory result after {} iteration(s)",
            outcome.run_id.short(),
            iterations
        ),
        RunStatus::Exhausted => format!(
            "Run {}: best-effort result after {} iteration(s), not judged satisfactory",
            outcome.run_id.short(),
            iterations
        ),
        RunStatus::Failed => format!("Run {}: failed, no result produced", outcome.run_id.short()),
    };
    if let Some(note) = &outcome.note {
        out.push_str(&format!("\nNote: {}", note));
    }
    if let Some(failure) = &outcome.failure {
        out.push_str(&format!("\nError: {}", failure));
    }
    out
}
