//! Token-aware context window manager
//!
//! Tracks how full the model's context window is and signals when a flush
//! (distillation + reset) should happen, using the same BPE tokeniser most
//! hosted chat models are priced and limited against.

use std::sync::OnceLock;

/// Per-message role/content overhead tiktoken's raw token count doesn't
/// capture (OpenAI-style chat formatting tokens).
const ROLE_OVERHEAD_TOKENS: usize = 4;

static CL100K_BASE: OnceLock<Option<tiktoken_rs::CoreBPE>> = OnceLock::new();

fn bpe() -> &'static Option<tiktoken_rs::CoreBPE> {
    CL100K_BASE.get_or_init(|| tiktoken_rs::cl100k_base().ok())
}

/// Count tokens in `text` with cl100k_base, falling back to a char/4
/// estimate if the BPE model failed to initialise - never panics.
pub fn count_tokens(text: &str) -> usize {
    match bpe() {
        Some(enc) => enc.encode_with_special_tokens(text).len(),
        None => text.chars().count() / 4,
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Manages the conversation context window: system prompt + message
/// history, with a running token count and a threshold-based flush signal.
pub struct ContextManager {
    model_context_limit: usize,
    flush_threshold: f32,
    keep_last_turns: usize,
    system_prompt: String,
    messages: Vec<Message>,
    system_tokens: usize,
    message_tokens: usize,
}

impl ContextManager {
    pub fn new(model_context_limit: usize, flush_threshold: f32, keep_last_turns: usize) -> Self {
        Self {
            model_context_limit,
            flush_threshold,
            keep_last_turns,
            system_prompt: String::new(),
            messages: Vec::new(),
            system_tokens: 0,
            message_tokens: 0,
        }
    }

    pub fn total_tokens(&self) -> usize {
        self.system_tokens + self.message_tokens
    }

    pub fn utilization(&self) -> f32 {
        if self.model_context_limit == 0 {
            return 0.0;
        }
        self.total_tokens() as f32 / self.model_context_limit as f32
    }

    pub fn tokens_remaining(&self) -> i64 {
        self.model_context_limit as i64 - self.total_tokens() as i64
    }

    /// Would adding `incoming_tokens` push usage past the flush threshold?
    /// Call before appending the new user message.
    pub fn needs_flush(&self, incoming_tokens: usize) -> bool {
        let projected = self.total_tokens() + incoming_tokens;
        projected as f32 >= (self.model_context_limit as f32 * self.flush_threshold)
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.system_tokens = count_tokens(&prompt) + ROLE_OVERHEAD_TOKENS;
        self.system_prompt = prompt;
    }

    pub fn add_message(&mut self, role: impl Into<String>, content: impl Into<String>) {
        let content = content.into();
        self.message_tokens += count_tokens(&content) + ROLE_OVERHEAD_TOKENS;
        self.messages.push(Message { role: role.into(), content });
    }

    /// Messages formatted for an LLM API call: `[system, ...history]`.
    pub fn messages_for_api(&self) -> Vec<Message> {
        let mut result = Vec::with_capacity(self.messages.len() + 1);
        if !self.system_prompt.is_empty() {
            result.push(Message { role: "system".into(), content: self.system_prompt.clone() });
        }
        result.extend(self.messages.iter().cloned());
        result
    }

    /// Render the conversation as `ROLE: content` lines for the Distiller.
    pub fn conversation_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Flush the window: keep only the last `keep_last_turns` messages for
    /// continuity, install a new system prompt, recompute token counts from
    /// scratch.
    pub fn reset(&mut self, new_system_prompt: impl Into<String>) {
        let keep_from = self.messages.len().saturating_sub(self.keep_last_turns);
        self.messages = self.messages.split_off(keep_from);

        let new_system_prompt = new_system_prompt.into();
        self.system_tokens = count_tokens(&new_system_prompt) + ROLE_OVERHEAD_TOKENS;
        self.system_prompt = new_system_prompt;
        self.message_tokens = self
            .messages
            .iter()
            .map(|m| count_tokens(&m.content) + ROLE_OVERHEAD_TOKENS)
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_flush_respects_threshold() {
        let mut cm = ContextManager::new(100, 0.5, 4);
        cm.set_system_prompt("short");
        assert!(!cm.needs_flush(0));
        cm.add_message("user", "a ".repeat(40));
        assert!(cm.needs_flush(0) || cm.utilization() < 0.5);
    }

    #[test]
    fn reset_keeps_only_last_n_messages() {
        let mut cm = ContextManager::new(1000, 0.7, 2);
        for i in 0..5 {
            cm.add_message("user", format!("message {}", i));
        }
        cm.reset("new system prompt");
        assert_eq!(cm.message_count(), 2);
        assert_eq!(cm.messages_for_api()[1].content, "message 3");
    }

    #[test]
    fn count_tokens_is_nonzero_for_nonempty_text() {
        assert!(count_tokens("hello world") > 0);
    }

    #[test]
    fn utilization_with_zero_limit_is_zero() {
        let cm = ContextManager::new(0, 0.7, 4);
        assert_eq!(cm.utilization(), 0.0);
    }
}
