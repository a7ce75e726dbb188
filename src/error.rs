use thiserror::Error;

use crate::core::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Invalid structured response during {stage}: {message}")]
    Parse { stage: String, message: String },

    #[error("Agent '{agent}' failed on task {}: {message}", .task_id.short())]
    AgentExecution {
        agent: String,
        task_id: TaskId,
        message: String,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid task transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Backend binary not found: {0}")]
    BackendBinaryNotFound(String),
}

impl Error {
    /// Wrap an error as the failure of a named orchestration stage.
    pub fn stage(stage: &str, source: Error) -> Self {
        Error::Stage {
            stage: stage.to_string(),
            source: Box::new(source),
        }
    }

    /// True for structured-response defects that a repair retry may fix.
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
