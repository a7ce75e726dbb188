//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted completion port (FIFO of canned replies, call recording)
//! - A routed completion port that answers by request kind
//! - JSON builders for coordinator responses

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use maestro::config::Config;
use maestro::llm::{CompletionPort, Message};
use maestro::orchestration::prompts::{
    AGGREGATION_MARKER, EVALUATION_MARKER, PLANNING_MARKER, WORKERS_MARKER,
};
use maestro::{Error, Result};

/// One canned reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }

    pub fn json(value: Value) -> Self {
        Reply::Text(value.to_string())
    }

    fn into_result(self) -> Result<String> {
        match self {
            Reply::Text(text) if text.trim().is_empty() => {
                Err(Error::EmptyResponse("scripted".to_string()))
            }
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(Error::Transport(message)),
        }
    }
}

/// What a recorded request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Workers,
    Plan,
    Aggregate,
    Evaluate,
    Worker,
}

impl RequestKind {
    pub fn classify(messages: &[Message]) -> Self {
        let request = messages
            .iter()
            .rev()
            .find(|m| m.content.starts_with(WORKERS_MARKER)
                || m.content.starts_with(PLANNING_MARKER)
                || m.content.starts_with(AGGREGATION_MARKER)
                || m.content.starts_with(EVALUATION_MARKER))
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if request.starts_with(WORKERS_MARKER) {
            RequestKind::Workers
        } else if request.starts_with(PLANNING_MARKER) {
            RequestKind::Plan
        } else if request.starts_with(AGGREGATION_MARKER) {
            RequestKind::Aggregate
        } else if request.starts_with(EVALUATION_MARKER) {
            RequestKind::Evaluate
        } else {
            RequestKind::Worker
        }
    }
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: RequestKind,
    pub structured: bool,
    pub messages: Vec<Message>,
}

impl Call {
    /// The last message, i.e. the request text or the repair instruction.
    pub fn last_content(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or_default()
    }

    /// The first user message.
    pub fn request(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == maestro::llm::Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Answers requests from a single FIFO queue.
#[derive(Default)]
pub struct ScriptedPort {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedPort {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn answer(&self, messages: &[Message], structured: bool) -> Result<String> {
        self.calls.lock().unwrap().push(Call {
            kind: RequestKind::classify(messages),
            structured,
            messages: messages.to_vec(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Fail("script exhausted".to_string()))
            .into_result()
    }
}

#[async_trait::async_trait]
impl CompletionPort for ScriptedPort {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message], _model: &str) -> Result<String> {
        self.answer(messages, false)
    }

    async fn complete_structured(&self, messages: &[Message], _model: &str) -> Result<String> {
        self.answer(messages, true)
    }
}

/// Answers each request kind from its own queue. When a queue has one
/// reply left it is repeated forever.
#[derive(Default)]
pub struct RoutedPort {
    workers: Mutex<VecDeque<Reply>>,
    plans: Mutex<VecDeque<Reply>>,
    aggregates: Mutex<VecDeque<Reply>>,
    verdicts: Mutex<VecDeque<Reply>>,
    worker_outputs: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
}

impl RoutedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workers(self, replies: Vec<Reply>) -> Self {
        *self.workers.lock().unwrap() = replies.into();
        self
    }

    pub fn plans(self, replies: Vec<Reply>) -> Self {
        *self.plans.lock().unwrap() = replies.into();
        self
    }

    pub fn aggregates(self, replies: Vec<Reply>) -> Self {
        *self.aggregates.lock().unwrap() = replies.into();
        self
    }

    pub fn verdicts(self, replies: Vec<Reply>) -> Self {
        *self.verdicts.lock().unwrap() = replies.into();
        self
    }

    pub fn worker_outputs(self, replies: Vec<Reply>) -> Self {
        *self.worker_outputs.lock().unwrap() = replies.into();
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: RequestKind) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    fn next(queue: &Mutex<VecDeque<Reply>>) -> Reply {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::Fail("no reply configured".to_string()))
        }
    }

    fn answer(&self, messages: &[Message], structured: bool) -> Result<String> {
        let kind = RequestKind::classify(messages);
        self.calls.lock().unwrap().push(Call {
            kind,
            structured,
            messages: messages.to_vec(),
        });
        let queue = match kind {
            RequestKind::Workers => &self.workers,
            RequestKind::Plan => &self.plans,
            RequestKind::Aggregate => &self.aggregates,
            RequestKind::Evaluate => &self.verdicts,
            RequestKind::Worker => &self.worker_outputs,
        };
        Self::next(queue).into_result()
    }
}

#[async_trait::async_trait]
impl CompletionPort for RoutedPort {
    fn name(&self) -> &str {
        "routed"
    }

    async fn complete(&self, messages: &[Message], _model: &str) -> Result<String> {
        self.answer(messages, false)
    }

    async fn complete_structured(&self, messages: &[Message], _model: &str) -> Result<String> {
        self.answer(messages, true)
    }
}

// ========== Response builders ==========

pub fn workers_json(names: &[&str]) -> Value {
    json!({
        "workers": names
            .iter()
            .map(|n| json!({
                "name": n,
                "role": format!("{} specialist", n),
                "system_prompt": format!("You are the {} specialist.", n),
            }))
            .collect::<Vec<_>>()
    })
}

/// `(description, agent, depends_on positions)`
pub fn plan_json(subtasks: &[(&str, &str, Vec<usize>)]) -> Value {
    json!({
        "subtasks": subtasks
            .iter()
            .map(|(description, agent, deps)| json!({
                "description": description,
                "assigned_agent": agent,
                "depends_on": deps,
            }))
            .collect::<Vec<_>>()
    })
}

pub fn verdict_json(satisfactory: bool, improvements: &str) -> Value {
    json!({
        "satisfactory": satisfactory,
        "reasoning": if satisfactory { "Complete and accurate" } else { "Has gaps" },
        "improvements_needed": improvements,
    })
}

/// Default limits with a test model name.
pub fn test_config() -> Config {
    Config {
        model: "test-model".to_string(),
        ..Config::default()
    }
}
