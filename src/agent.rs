//! Worker agents and the per-iteration agent registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::TaskId;
use crate::error::{Error, Result};
use crate::llm::{CompletionPort, Message};
use crate::{mlog_debug, mlog_warn};

/// Normalise a coordinator-chosen agent name into a registry key.
///
/// Trims, then collapses inner whitespace runs to a single `_`.
pub fn normalize_agent_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Coordinator-authored description of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub system_prompt: String,
}

/// A named system prompt bound to a completion port.
pub struct Agent {
    name: String,
    role: String,
    system_prompt: String,
    model: String,
    port: Arc<dyn CompletionPort>,
}

impl Agent {
    pub fn new(spec: &WorkerSpec, model: &str, port: Arc<dyn CompletionPort>) -> Self {
        Self {
            name: normalize_agent_name(&spec.name),
            role: spec.role.clone(),
            system_prompt: spec.system_prompt.clone(),
            model: model.to_string(),
            port,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Run the agent on a task.
    ///
    /// Makes exactly one completion call. Any failure comes back as
    /// `Error::AgentExecution` naming this agent and the task.
    pub async fn run(&self, task_id: &TaskId, context: &str) -> Result<String> {
        mlog_debug!("Agent {} running task {}", self.name, task_id.short());
        let messages = [
            Message::system(self.system_prompt.as_str()),
            Message::user(context),
        ];
        self.port
            .complete(&messages, &self.model)
            .await
            .map_err(|e| Error::AgentExecution {
                agent: self.name.clone(),
                task_id: *task_id,
                message: e.to_string(),
            })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("model", &self.model)
            .field("port", &self.port.name())
            .finish()
    }
}

/// Mapping from agent name to agent, built fresh each iteration.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
    /// Names in first-seen order, for prompts and reports.
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one agent per spec. A later spec with the same name replaces
    /// the earlier agent but keeps its position.
    pub fn from_specs(specs: &[WorkerSpec], model: &str, port: Arc<dyn CompletionPort>) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.insert(Agent::new(spec, model, Arc::clone(&port)));
        }
        registry
    }

    pub fn insert(&mut self, agent: Agent) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_some() {
            mlog_warn!("Duplicate worker name '{}', keeping the last definition", name);
        } else {
            self.order.push(name);
        }
    }

    /// Look up an agent by (unnormalised) name.
    pub fn get(&self, name: &str) -> Result<&Agent> {
        self.agents
            .get(&normalize_agent_name(name))
            .ok_or_else(|| Error::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(&normalize_agent_name(name))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Agents in first-seen order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.order.iter().filter_map(|name| self.agents.get(name))
    }
}
