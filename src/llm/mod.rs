//! Structured-completion port.
//!
//! Everything that talks to a language model goes through [`CompletionPort`].
//! Backends live in the submodules; the orchestration layer only ever sees
//! `Arc<dyn CompletionPort>`.
//!
//! [`request_structured`] is the single place that turns model text into typed
//! values. It owns the JSON-repair policy: one retry with the bad response and
//! a correction request appended to the conversation, then a hard failure.

pub mod claude;
pub mod ollama;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::config::{Backend, Config};
use crate::error::{Error, Result};
use crate::util::truncate_chars;
use crate::{mlog_debug, mlog_warn};

pub use claude::ClaudeCli;
pub use ollama::OllamaClient;

/// Fenced code block, optionally tagged `json`.
static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// Who authored a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A text-generation service.
///
/// Implementations must fail with `Error::Transport` on network or service
/// failure and `Error::EmptyResponse` when the service returns no text.
#[async_trait::async_trait]
pub trait CompletionPort: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Complete a conversation, returning free text.
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String>;

    /// Complete a conversation, asking the backend for JSON output.
    ///
    /// The returned text is only expected to be JSON; callers validate it
    /// through [`request_structured`].
    async fn complete_structured(&self, messages: &[Message], model: &str) -> Result<String> {
        self.complete(messages, model).await
    }
}

/// A typed response the coordinator asks for.
pub trait StructuredResponse: DeserializeOwned {
    /// Example JSON shape quoted back to the model on a repair retry.
    fn shape_hint() -> &'static str;

    /// Semantic checks beyond deserialisation. An `Err` is treated exactly
    /// like malformed JSON.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Reject whitespace-only responses.
pub fn non_empty(source: &str, text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(Error::EmptyResponse(source.to_string()));
    }
    Ok(text)
}

/// Pull the JSON payload out of a model response.
///
/// Text that already parses is returned whole. A response that opens with a
/// code fence yields the fenced block. Anything else falls back to the
/// outermost `{...}` span.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed);
    }
    if trimmed.starts_with("```") {
        if let Some(inner) = FENCED_JSON_RE
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
        {
            return Some(inner);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Parse and validate one structured response.
pub fn parse_structured<T: StructuredResponse>(text: &str, stage: &str) -> Result<T> {
    parse_checked(text, stage, &|_: &T| Ok(()))
}

fn parse_checked<T, F>(text: &str, stage: &str, check: &F) -> Result<T>
where
    T: StructuredResponse,
    F: Fn(&T) -> std::result::Result<(), String>,
{
    let parse_error = |message: String| Error::Parse {
        stage: stage.to_string(),
        message,
    };
    let json = extract_json(text).ok_or_else(|| parse_error("no JSON object found".to_string()))?;
    let value: T = serde_json::from_str(json).map_err(|e| parse_error(e.to_string()))?;
    value.validate().map_err(parse_error)?;
    check(&value).map_err(parse_error)?;
    Ok(value)
}

fn repair_request(reason: &str, shape: &str) -> String {
    format!(
        "That was not valid JSON for this request ({}). Please fix it and output ONLY valid JSON, \
         no other text, matching this shape:\n{}",
        reason, shape
    )
}

/// Issue a structured request with exactly one repair retry.
///
/// Transport failures are not retried; only shape defects are.
pub async fn request_structured<T: StructuredResponse>(
    port: &dyn CompletionPort,
    messages: &[Message],
    model: &str,
    stage: &str,
) -> Result<T> {
    request_structured_checked(port, messages, model, stage, |_: &T| Ok(())).await
}

/// Like [`request_structured`], with a caller check that depends on request
/// settings. A failed check is a shape defect and gets the same retry.
pub async fn request_structured_checked<T, F>(
    port: &dyn CompletionPort,
    messages: &[Message],
    model: &str,
    stage: &str,
    check: F,
) -> Result<T>
where
    T: StructuredResponse,
    F: Fn(&T) -> std::result::Result<(), String> + Send + Sync,
{
    let first = port.complete_structured(messages, model).await?;
    let reason = match parse_checked::<T, F>(&first, stage, &check) {
        Ok(value) => return Ok(value),
        Err(Error::Parse { message, .. }) => message,
        Err(e) => return Err(e),
    };

    mlog_warn!(
        "{}: invalid structured response ({}), retrying once. Response: {}",
        stage,
        reason,
        truncate_chars(&first, 200)
    );

    let mut repair = messages.to_vec();
    repair.push(Message::assistant(first));
    repair.push(Message::user(repair_request(&reason, T::shape_hint())));

    let second = port.complete_structured(&repair, model).await?;
    let value = parse_checked::<T, F>(&second, stage, &check)?;
    mlog_debug!("{}: repair retry succeeded", stage);
    Ok(value)
}

/// Build the configured backend.
pub fn connect(config: &Config) -> Result<Arc<dyn CompletionPort>> {
    let port: Arc<dyn CompletionPort> = match config.backend {
        Backend::Ollama => Arc::new(OllamaClient::new(
            &config.ollama_url,
            config.request_timeout(),
        )?),
        Backend::Claude => {
            let cli = match &config.claude_command {
                Some(command) => ClaudeCli::from_command(command)?,
                None => ClaudeCli::new()?,
            };
            Arc::new(cli.with_timeout(config.request_timeout()))
        }
    };
    mlog_debug!("Completion backend: {}", port.name());
    Ok(port)
}
