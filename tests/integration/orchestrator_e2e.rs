//! End-to-end runs of the iteration loop against scripted coordinators.
//!
//! Tests verify:
//! - Single-worker and chained plans run to a satisfactory answer
//! - Worker failures surface in aggregation without aborting the run
//! - Critique from an unsatisfactory iteration reaches the next plan
//! - The loop stops at the iteration cap and falls back on a failure in any
//!   later stage
//! - A malformed structured response is repaired exactly once

use tokio::sync::mpsc;

use maestro::core::TaskStatus;
use maestro::orchestration::{Orchestrator, SchedulerEvent};
use maestro::run::RunStatus;

use crate::fixtures::{
    plan_json, test_config, verdict_json, workers_json, Reply, RequestKind, RoutedPort,
    ScriptedPort,
};

#[tokio::test]
async fn test_single_worker_no_dependencies() {
    let port = ScriptedPort::new(vec![
        Reply::json(workers_json(&["writer"])),
        Reply::json(plan_json(&[("Write the haiku", "writer", vec![])])),
        Reply::text("An old silent pond"),
        Reply::text("# Haiku\nAn old silent pond"),
        Reply::json(verdict_json(true, "")),
    ]);
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Write a haiku")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    assert_eq!(outcome.answer.as_deref(), Some("# Haiku\nAn old silent pond"));
    assert_eq!(outcome.iterations.len(), 1);
    assert_eq!(port.remaining(), 0);

    let record = outcome.last_iteration().unwrap();
    assert_eq!(record.schedule.steps, 1);
    assert!(record.schedule.settled);
    assert_eq!(record.graph.count_with_status(TaskStatus::Done), 1);

    let calls = port.calls();
    let kinds: Vec<RequestKind> = calls.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RequestKind::Workers,
            RequestKind::Plan,
            RequestKind::Worker,
            RequestKind::Aggregate,
            RequestKind::Evaluate,
        ]
    );
    // Aggregation sees exactly one output.
    let aggregate = calls[3].request();
    assert_eq!(aggregate.matches("Result: ").count(), 1);
    assert!(aggregate.contains("An old silent pond"));
    // Only the structured stages ask for JSON.
    assert!(calls[0].structured && calls[1].structured && calls[4].structured);
    assert!(!calls[2].structured && !calls[3].structured);
}

#[tokio::test]
async fn test_linear_chain_runs_in_order() {
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["researcher", "writer"]))])
        .plans(vec![Reply::json(plan_json(&[
            ("Collect facts about tides", "researcher", vec![]),
            ("Write the explanation", "writer", vec![0]),
        ]))])
        .worker_outputs(vec![
            Reply::text("The moon pulls the oceans."),
            Reply::text("Tides happen because the moon pulls the oceans."),
        ])
        .aggregates(vec![Reply::text("Tides explained.")])
        .verdicts(vec![Reply::json(verdict_json(true, ""))])
        .build();
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = Orchestrator::new(port.clone(), test_config())
        .with_events(tx)
        .run("Explain tides")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    let record = outcome.last_iteration().unwrap();
    assert_eq!(record.schedule.steps, 2);
    assert_eq!(record.graph.count_with_status(TaskStatus::Done), 2);

    let tasks = record.graph.tasks();
    assert_eq!(tasks[1].depends_on, vec![tasks[0].id]);

    let mut started = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SchedulerEvent::TaskStarted { task_id, agent } = event {
            started.push((task_id, agent));
        }
    }
    assert_eq!(
        started,
        vec![
            (tasks[0].id, "researcher".to_string()),
            (tasks[1].id, "writer".to_string()),
        ]
    );

    // The writer saw the researcher's summary.
    let worker_calls = port.calls_of(RequestKind::Worker);
    assert!(worker_calls[1]
        .request()
        .contains("Result: The moon pulls the oceans."));
}

#[tokio::test]
async fn test_failed_task_reported_in_aggregation() {
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["analyst"]))])
        .plans(vec![Reply::json(plan_json(&[
            ("Fetch the numbers", "analyst", vec![]),
            ("Chart the numbers", "analyst", vec![0]),
        ]))])
        .worker_outputs(vec![Reply::Fail("connection refused".to_string())])
        .aggregates(vec![Reply::text("Partial answer.")])
        .verdicts(vec![Reply::json(verdict_json(true, ""))])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Chart revenue")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    assert_eq!(outcome.answer.as_deref(), Some("Partial answer."));

    let record = outcome.last_iteration().unwrap();
    let tasks = record.graph.tasks();
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[1].status, TaskStatus::Pending);
    assert_eq!(record.schedule.blocked.len(), 1);
    assert_eq!(port.calls_of(RequestKind::Worker).len(), 1);

    let aggregate = port.calls_of(RequestKind::Aggregate)[0].request().to_string();
    assert!(aggregate.contains("FAILED: "));
    assert!(aggregate.contains("connection refused"));
    assert!(aggregate.contains("NOT EXECUTED: blocked by a failed dependency"));
    assert!(aggregate.contains("do not invent"));
    // Evaluation still ran on the partial content.
    assert_eq!(port.calls_of(RequestKind::Evaluate).len(), 1);
}

#[tokio::test]
async fn test_critique_reaches_second_iteration() {
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["writer"]))])
        .plans(vec![Reply::json(plan_json(&[("Write it", "writer", vec![])]))])
        .worker_outputs(vec![Reply::text("draft")])
        .aggregates(vec![Reply::text("first answer"), Reply::text("second answer")])
        .verdicts(vec![
            Reply::json(verdict_json(false, "add examples")),
            Reply::json(verdict_json(true, "")),
        ])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Explain closures")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    assert_eq!(outcome.answer.as_deref(), Some("second answer"));
    assert_eq!(outcome.iterations.len(), 2);
    assert!(outcome.note.is_none());

    let plans = port.calls_of(RequestKind::Plan);
    assert_eq!(plans.len(), 2);
    assert!(!plans[0].request().contains("add examples"));
    let second = plans[1].request();
    assert!(second.contains("add examples"));
    assert!(second.contains("first answer"));
    assert!(second.contains("This is iteration 2"));
    // Worker definition is critiqued too.
    assert!(port.calls_of(RequestKind::Workers)[1]
        .request()
        .contains("add examples"));
}

#[tokio::test]
async fn test_never_satisfied_stops_at_cap() {
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["writer"]))])
        .plans(vec![Reply::json(plan_json(&[("Write it", "writer", vec![])]))])
        .worker_outputs(vec![Reply::text("draft")])
        .aggregates(vec![
            Reply::text("answer 1"),
            Reply::text("answer 2"),
            Reply::text("answer 3"),
            Reply::text("answer 4"),
            Reply::text("answer 5"),
            Reply::text("answer 6"),
        ])
        .verdicts(vec![Reply::json(verdict_json(false, "try harder"))])
        .build();
    let config = test_config();
    assert_eq!(config.max_iterations, 5);
    let outcome = Orchestrator::new(port.clone(), config).run("Anything").await;

    assert_eq!(outcome.status, RunStatus::Exhausted);
    assert_eq!(outcome.answer.as_deref(), Some("answer 5"));
    assert_eq!(outcome.iterations.len(), 5);
    assert!(outcome.failure.is_none());
    assert!(outcome
        .note
        .as_deref()
        .unwrap()
        .contains("No satisfactory result after 5 iterations"));
    assert_eq!(port.calls_of(RequestKind::Evaluate).len(), 5);
    for record in &outcome.iterations {
        assert!(record.schedule.steps <= test_config().max_scheduler_steps);
    }
}

#[tokio::test]
async fn test_iteration_failure_falls_back_to_previous_result() {
    let port = RoutedPort::new()
        .workers(vec![
            Reply::json(workers_json(&["writer"])),
            Reply::text("this is not json"),
        ])
        .plans(vec![Reply::json(plan_json(&[("Write it", "writer", vec![])]))])
        .worker_outputs(vec![Reply::text("draft")])
        .aggregates(vec![Reply::text("iteration one answer")])
        .verdicts(vec![Reply::json(verdict_json(false, "more depth"))])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Explain ownership")
        .await;

    assert_eq!(outcome.status, RunStatus::Exhausted);
    assert_eq!(outcome.answer.as_deref(), Some("iteration one answer"));
    assert_eq!(outcome.iterations.len(), 1);

    let failure = outcome.failure.as_ref().unwrap();
    assert!(failure.to_string().starts_with("define_workers failed"));
    let note = outcome.note.as_deref().unwrap();
    assert!(note.starts_with("Iteration 2 failed"));
    assert!(note.contains("iteration 1"));
    // One successful call, then the failed attempt and its single repair.
    assert_eq!(port.calls_of(RequestKind::Workers).len(), 3);
}

#[tokio::test]
async fn test_malformed_workers_repaired_once() {
    let port = RoutedPort::new()
        .workers(vec![
            Reply::text("Sure! Here are your workers: writer, editor"),
            Reply::text(format!(
                "```json\n{}\n```",
                workers_json(&["writer", "editor"])
            )),
        ])
        .plans(vec![Reply::json(plan_json(&[
            ("Draft", "writer", vec![]),
            ("Polish", "editor", vec![0]),
        ]))])
        .worker_outputs(vec![Reply::text("text")])
        .aggregates(vec![Reply::text("done")])
        .verdicts(vec![Reply::json(verdict_json(true, ""))])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Write a story")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    let record = outcome.last_iteration().unwrap();
    let names: Vec<&str> = record.worker_specs.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["writer", "editor"]);

    let workers = port.calls_of(RequestKind::Workers);
    assert_eq!(workers.len(), 2);
    assert!(workers[1].last_content().contains("ONLY valid JSON"));
    assert_eq!(workers[1].messages.len(), workers[0].messages.len() + 2);
}

#[tokio::test]
async fn test_repair_not_retried_a_second_time() {
    let port = ScriptedPort::new(vec![
        Reply::text("nope"),
        Reply::text("still nope"),
        Reply::json(workers_json(&["writer"])),
    ]);
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Anything")
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.answer.is_none());
    assert_eq!(port.calls().len(), 2);
    assert_eq!(port.remaining(), 1);
}

#[tokio::test]
async fn test_stale_dependency_rejects_single_subtask() {
    let stale = "00000000-0000-4000-8000-000000000000";
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["writer"]))])
        .plans(vec![Reply::json(serde_json::json!({
            "subtasks": [
                {"description": "Good", "assigned_agent": "writer", "depends_on": []},
                {"description": "Stale", "assigned_agent": "writer", "depends_on": [stale]},
                {"description": "Ghost", "assigned_agent": "nobody", "depends_on": []},
            ]
        }))])
        .worker_outputs(vec![Reply::text("ok")])
        .aggregates(vec![Reply::text("answer")])
        .verdicts(vec![Reply::json(verdict_json(true, ""))])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Anything")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    let record = outcome.last_iteration().unwrap();
    assert_eq!(record.graph.task_count(), 1);
    let rejected: Vec<usize> = record.rejections.iter().map(|r| r.index).collect();
    assert_eq!(rejected, vec![1, 2]);
    assert_eq!(port.calls_of(RequestKind::Worker).len(), 1);
}

#[tokio::test]
async fn test_evaluation_failure_falls_back_to_previous_result() {
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["writer"]))])
        .plans(vec![Reply::json(plan_json(&[("Write it", "writer", vec![])]))])
        .worker_outputs(vec![Reply::text("draft")])
        .aggregates(vec![
            Reply::text("iteration one answer"),
            Reply::text("iteration two answer"),
        ])
        .verdicts(vec![
            Reply::json(verdict_json(false, "more depth")),
            Reply::text("I think it is fine overall"),
        ])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Explain lifetimes")
        .await;

    assert_eq!(outcome.status, RunStatus::Exhausted);
    assert_eq!(outcome.answer.as_deref(), Some("iteration one answer"));
    assert_eq!(outcome.iterations.len(), 1);
    let failure = outcome.failure.as_ref().unwrap();
    assert!(failure.to_string().starts_with("evaluate_result failed"));
    assert!(outcome.note.as_deref().unwrap().starts_with("Iteration 2 failed"));
    // One verdict for iteration 1, then the failed attempt and its repair.
    assert_eq!(port.calls_of(RequestKind::Evaluate).len(), 3);
}

#[tokio::test]
async fn test_aggregation_failure_falls_back_to_previous_result() {
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers_json(&["writer"]))])
        .plans(vec![Reply::json(plan_json(&[("Write it", "writer", vec![])]))])
        .worker_outputs(vec![Reply::text("draft")])
        .aggregates(vec![
            Reply::text("iteration one answer"),
            Reply::Fail("aggregator offline".to_string()),
        ])
        .verdicts(vec![Reply::json(verdict_json(false, "more depth"))])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Explain lifetimes")
        .await;

    assert_eq!(outcome.status, RunStatus::Exhausted);
    assert_eq!(outcome.answer.as_deref(), Some("iteration one answer"));
    assert_eq!(outcome.iterations.len(), 1);
    let failure = outcome.failure.as_ref().unwrap().to_string();
    assert!(failure.starts_with("aggregate failed"));
    assert!(failure.contains("aggregator offline"));
    // Transport failures are not retried, and iteration 2 never evaluates.
    assert_eq!(port.calls_of(RequestKind::Aggregate).len(), 2);
    assert_eq!(port.calls_of(RequestKind::Evaluate).len(), 1);
}

#[tokio::test]
async fn test_backticks_inside_worker_prompt_parse_first_time() {
    let workers = serde_json::json!({
        "workers": [{
            "name": "coder",
            "role": "writes code",
            "system_prompt": "Wrap code in ```rust fences``` always.",
        }]
    });
    let port = RoutedPort::new()
        .workers(vec![Reply::json(workers)])
        .plans(vec![Reply::json(plan_json(&[("Write it", "coder", vec![])]))])
        .worker_outputs(vec![Reply::text("fn main() {}")])
        .aggregates(vec![Reply::text("done")])
        .verdicts(vec![Reply::json(verdict_json(true, ""))])
        .build();
    let outcome = Orchestrator::new(port.clone(), test_config())
        .run("Write a program")
        .await;

    assert_eq!(outcome.status, RunStatus::Satisfactory);
    assert_eq!(port.calls_of(RequestKind::Workers).len(), 1);
    let worker_calls = port.calls_of(RequestKind::Worker);
    assert_eq!(
        worker_calls[0].messages[0].content,
        "Wrap code in ```rust fences``` always."
    );
}
