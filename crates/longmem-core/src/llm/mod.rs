//! Chat completion client used by the distiller and the agent's own turn
//! loop. Abstracted behind `LlmClient` so Groq, OpenAI, Gemini's
//! OpenAI-compatible endpoint, and local Ollama servers can all be driven
//! through a single `OpenAiCompatibleClient`, and so tests can substitute a
//! fake.

mod retry;

pub use retry::complete_with_retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// A single chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider to constrain output to a JSON object, when supported.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, temperature: 0.7, max_tokens: 1024, json_mode: false }
    }

    pub fn json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[derive(Debug)]
pub enum LlmError {
    Request(String),
    RateLimited,
    Http { status: u16, body: String },
    EmptyResponse,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Request(msg) => write!(f, "llm request failed: {msg}"),
            LlmError::RateLimited => write!(f, "llm provider rate-limited the request"),
            LlmError::Http { status, body } => write!(f, "llm provider returned {status}: {body}"),
            LlmError::EmptyResponse => write!(f, "llm provider returned no completion choices"),
        }
    }
}

impl std::error::Error for LlmError {}

/// A chat-completion backend. The distiller and agent only depend on this
/// trait, never on a concrete provider, so tests can substitute a canned
/// client and the CLI can pick a provider at runtime.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.as_ref().complete(request).await
    }
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint: OpenAI
/// itself, Groq, Gemini's compatibility layer, or a local Ollama server.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            payload["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http { status: status.as_u16(), body });
        }

        let body: serde_json::Value = response.json().await.map_err(|e| LlmError::Request(e.to_string()))?;

        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        let usage = body.get("usage");
        let prompt_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).map(|v| v as u32);
        let completion_tokens =
            usage.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).map(|v| v as u32);

        Ok(ChatResponse { content, prompt_tokens, completion_tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedClient(String);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse { content: self.0.clone(), prompt_tokens: None, completion_tokens: None })
        }
    }

    #[tokio::test]
    async fn canned_client_echoes_configured_content() {
        let client = CannedClient("hello".to_string());
        let resp = client.complete(ChatRequest::new(vec![ChatMessage::user("hi")])).await.unwrap();
        assert_eq!(resp.content, "hello");
    }

    #[test]
    fn chat_request_builder_sets_json_mode_and_temperature() {
        let req = ChatRequest::new(vec![]).json_mode().with_temperature(0.1).with_max_tokens(2000);
        assert!(req.json_mode);
        assert_eq!(req.temperature, 0.1);
        assert_eq!(req.max_tokens, 2000);
    }
}
