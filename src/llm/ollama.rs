//! Ollama chat backend.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{non_empty, CompletionPort, Message};
use crate::error::{Error, Result};
use crate::mlog_trace;
use crate::util::truncate_chars;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for a local Ollama server's `/api/chat` endpoint.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request<'a>(
        messages: &'a [Message],
        model: &'a str,
        json_mode: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
            format: json_mode.then_some("json"),
        }
    }

    async fn chat(&self, messages: &[Message], model: &str, json_mode: bool) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let request = Self::build_request(messages, model, json_mode);
        mlog_trace!(
            "ollama: POST {} model={} messages={} json={}",
            url,
            model,
            messages.len(),
            json_mode
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::Transport(format!(
                        "Failed to connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else if e.is_timeout() {
                    Error::Timeout(self.timeout)
                } else {
                    Error::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));
            return Err(Error::Transport(sanitize_error(&detail)));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Transport(format!(
                "Unexpected Ollama response ({}): {}",
                e,
                truncate_chars(&body, 200)
            ))
        })?;
        non_empty("ollama", parsed.message.content)
    }
}

/// Strip local paths from server errors and give common failures a hint.
fn sanitize_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("/home") || lower.contains("/root") || lower.contains("\\users\\") {
        return "Ollama reported an internal error. Check the server logs.".to_string();
    }
    if lower.contains("model") && (lower.contains("not found") || lower.contains("pull")) {
        return format!(
            "Model not available ({}). Pull it first with: ollama pull <model>",
            truncate_chars(error, 120)
        );
    }
    truncate_chars(error, 300)
}

#[async_trait::async_trait]
impl CompletionPort for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, messages: &[Message], model: &str) -> Result<String> {
        self.chat(messages, model, false).await
    }

    async fn complete_structured(&self, messages: &[Message], model: &str) -> Result<String> {
        self.chat(messages, model, true).await
    }
}
