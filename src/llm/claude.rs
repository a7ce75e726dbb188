//! Claude Code headless backend.
//!
//! Runs the `claude` binary in non-interactive mode (`-p`) with JSON output
//! and maps its result envelope onto the completion port. The CLI takes a
//! single prompt, so the conversation is flattened with role headers.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use super::{non_empty, CompletionPort, Message};
use crate::error::{Error, Result};
use crate::mlog_trace;
use crate::util::with_timeout;

/// Default timeout for one CLI invocation (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Result envelope printed by `claude -p --output-format json`.
#[derive(Debug, Deserialize)]
struct Envelope {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    is_error: bool,
}

/// Claude Code headless executor.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    /// Path to the Claude binary.
    binary: PathBuf,
    /// Extra arguments placed before the prompt.
    extra_args: Vec<String>,
    /// Timeout for one invocation.
    timeout: Duration,
}

impl ClaudeCli {
    /// Locate `claude` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendBinaryNotFound` if the binary cannot be found.
    pub fn new() -> Result<Self> {
        let binary =
            which::which("claude").map_err(|_| Error::BackendBinaryNotFound("claude".to_string()))?;
        Ok(Self::with_binary(binary))
    }

    /// Use a specific binary path.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            extra_args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Parse a command line such as `claude --verbose` into binary and
    /// leading arguments.
    pub fn from_command(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let binary = parts
            .next()
            .ok_or_else(|| Error::Validation("claude_command is empty".to_string()))?;
        Ok(Self {
            extra_args: parts.map(str::to_string).collect(),
            ..Self::with_binary(PathBuf::from(binary))
        })
    }

    /// Set a custom timeout for execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Flatten a conversation into one prompt.
    pub fn flatten(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| format!("[{}]\n{}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn args(&self, prompt: &str, model: &str) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.extend([
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ]);
        if !model.trim().is_empty() {
            args.extend(["--model".to_string(), model.to_string()]);
        }
        args
    }

    /// Interpret the CLI's stdout and exit status.
    ///
    /// A non-zero exit is a failure even when stdout holds a success envelope.
    fn interpret(stdout: &str, stderr: &str, success: bool, code: Option<i32>) -> Result<String> {
        let envelope = serde_json::from_str::<Envelope>(stdout.trim()).ok();

        if !success {
            let message = envelope
                .and_then(|e| e.error)
                .or_else(|| Some(stderr.trim().to_string()).filter(|s| !s.is_empty()))
                .unwrap_or_else(|| {
                    format!(
                        "Claude execution failed with exit code {}",
                        code.unwrap_or(-1)
                    )
                });
            return Err(Error::Transport(message));
        }

        match envelope {
            Some(envelope) => {
                let failed = envelope.is_error
                    || envelope.error.is_some()
                    || matches!(envelope.subtype.as_deref(), Some(s) if s.starts_with("error"));
                if failed {
                    let message = envelope
                        .error
                        .or(envelope.result)
                        .unwrap_or_else(|| "Claude reported an error".to_string());
                    return Err(Error::Transport(message));
                }
                non_empty("claude", envelope.result.unwrap_or_default())
            }
            // Non-JSON success output
            None => non_empty("claude", stdout.trim().to_string()),
        }
    }

    async fn execute(&self, messages: &[Message], model: &str) -> Result<String> {
        let prompt = Self::flatten(messages);
        mlog_trace!(
            "claude: {} ({} chars, model={})",
            self.binary.display(),
            prompt.len(),
            model
        );

        let output = with_timeout(self.timeout, async {
            Command::new(&self.binary)
                .args(self.args(&prompt, model))
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| {
                    Error::Transport(format!("Failed to run {}: {}", self.binary.display(), e))
                })
        })
        .await?;

        Self::interpret(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.success(),
            output.status.code(),
        )
    }
}

#[async_trait::async_trait]
impl CompletionPort for ClaudeCli {
    fn name(&self) -> &str {
        "claude"
    }

    async fn complete(&self, messages: &[Message], model: &str) -> Result<String> {
        self.execute(messages, model).await
    }
}
