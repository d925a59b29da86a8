//! Completion transport for question generation.
//!
//! [`CompletionClient`] is the seam between the generator and the network.
//! [`HttpCompletionClient`] speaks the OpenAI-compatible
//! `/chat/completions` protocol (Mistral by default). Errors keep the HTTP
//! status so the generator can tell throttling and outages (retry) from
//! rejected requests (give up).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// One chat message in a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system", content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user", content: content.into() }
    }
}

/// Body of a `/chat/completions` request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// The service answered with a non-success status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("request timed out")]
    Timeout,

    /// Connection refused/reset, DNS failure and the like.
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response that carried no usable message content.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// 429, 5xx, timeouts and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            Self::Timeout | Self::Transport(_) => true,
            Self::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send one request and return the first choice's message content.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// `reqwest` client for OpenAI-compatible chat completion APIs.
pub struct HttpCompletionClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpCompletionClient {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %body, "completion request failed");
            return Err(CompletionError::Status {
                code: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let body = response.text().await.map_err(map_transport_error)?;
        message_content(&body)
    }
}

fn map_transport_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Transport(e.to_string())
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a response body.
fn message_content(body: &str) -> Result<String, CompletionError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::InvalidResponse(format!("malformed body: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CompletionError::InvalidResponse("no message content".into()))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
