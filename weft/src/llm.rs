//! LLM client abstraction for the chat step.
//!
//! The chat executor depends on a callable that turns a message list into
//! assistant text; this module defines the trait, a mock for tests, and
//! an OpenAI-compatible HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error from an LLM invocation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport failure (connection, timeout).
    #[error("llm transport: {0}")]
    Transport(String),
    /// Non-success HTTP status from the API.
    #[error("llm api status {status}: {body}")]
    Api { status: u16, body: String },
    /// Response body did not contain an assistant message.
    #[error("llm response malformed: {0}")]
    Malformed(String),
}

/// One chat message: role (`system`, `user`, `assistant`) and content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// LLM client: given messages and a model name, returns assistant text.
///
/// **Interaction**: used by the chat step executor; implementations are
/// `MockLlm` (fixed reply, tests) and [`OpenAiCompatClient`] (real API).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Fixed-reply client for tests and dry runs.
pub struct MockLlm {
    reply: String,
}

impl MockLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint.
///
/// POSTs `{base_url}/chat/completions` with a bearer token when one is
/// configured. Only the first choice's message content is used.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Reads `LLM_BASE_URL` (default OpenAI) and `LLM_API_KEY` from the
    /// environment.
    pub fn from_env() -> Self {
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Self::new(base_url, std::env::var("LLM_API_KEY").ok())
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn invoke(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .json(&CompletionRequest { model, messages });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))
    }
}
