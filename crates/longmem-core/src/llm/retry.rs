//! Exponential backoff around a single `LlmClient::complete` call.
//!
//! Only rate-limit responses are retried; any other error (bad request,
//! auth failure, empty response) is assumed to fail on every attempt and is
//! returned immediately.

use std::time::Duration;

use tracing::warn;

use super::{ChatRequest, ChatResponse, LlmClient, LlmError};

const BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: usize = 5;

/// Run `request` against `client`, retrying on `LlmError::RateLimited` with
/// a doubling delay starting at 5s, up to `MAX_ATTEMPTS` tries.
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    request: ChatRequest,
) -> Result<ChatResponse, LlmError> {
    let mut delay = BASE_DELAY;
    for attempt in 1..=MAX_ATTEMPTS {
        match client.complete(request.clone_for_retry()).await {
            Ok(resp) => return Ok(resp),
            Err(LlmError::RateLimited) if attempt < MAX_ATTEMPTS => {
                warn!(attempt, delay_secs = delay.as_secs(), "llm rate-limited; backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    Err(LlmError::RateLimited)
}

impl ChatRequest {
    fn clone_for_retry(&self) -> ChatRequest {
        ChatRequest {
            messages: self.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_mode: self.json_mode,
        }
    }
}
