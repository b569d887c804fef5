//! Scripted LLM client
//!
//! Replays a fixed sequence of canned chat-completion responses, one per
//! call, in order. Lets journey tests drive the Distiller's two-pass
//! protocol (and the Agent's own reply) without a live provider.

use std::sync::Mutex;

use async_trait::async_trait;
use longmem_core::{ChatRequest, ChatResponse, LlmClient, LlmError};

pub struct ScriptedLlmClient {
    responses: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    /// `responses` are served front-to-back, one per `complete` call. A
    /// script that runs out before the test does is a test-authoring bug,
    /// so we panic loudly rather than silently returning garbage.
    pub fn new(responses: Vec<&str>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().map(String::from).rev().collect()) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut responses = self.responses.lock().expect("scripted client lock poisoned");
        let content = responses.pop().expect("scripted client ran out of canned responses");
        Ok(ChatResponse { content, prompt_tokens: None, completion_tokens: None })
    }
}
