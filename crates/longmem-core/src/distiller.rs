//! Two-pass LLM-based memory distillation.
//!
//! Pass 1 (extraction) is liberal: it errs toward proposing a candidate.
//! Pass 2 (validation) is strict: it rejects world knowledge, ephemeral
//! chatter, and anything the conversation doesn't actually support.

use std::collections::HashSet;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::llm::{complete_with_retry, ChatMessage, ChatRequest, LlmClient, LlmError};
use crate::memory::{Memory, MemoryAction, MemoryType};
use crate::prompts::{render, EXTRACTION_PROMPT, VALIDATION_PROMPT};

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_MAX_TOKENS: u32 = 4000;
const VALIDATION_TEMPERATURE: f32 = 0.1;
const VALIDATION_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Deserialize)]
struct RawMemory {
    #[serde(default = "default_action")]
    action: String,
    #[serde(default = "default_type")]
    r#type: String,
    #[serde(default = "default_category")]
    category: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

fn default_action() -> String {
    "add".to_string()
}
fn default_type() -> String {
    "fact".to_string()
}
fn default_category() -> String {
    "general".to_string()
}
fn default_confidence() -> f32 {
    0.8
}

#[derive(Debug, Deserialize)]
struct MemoriesEnvelope {
    #[serde(default)]
    memories: Vec<RawMemory>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    key: String,
    #[serde(default = "default_reject")]
    verdict: String,
    #[serde(default)]
    reason: String,
}

fn default_reject() -> String {
    "reject".to_string()
}

#[derive(Debug, Deserialize)]
struct ValidationEnvelope {
    #[serde(default)]
    validations: Vec<Verdict>,
}

/// A candidate produced by Pass 1, carried through Pass 2 and into
/// `Agent::apply_distilled`.
#[derive(Debug, Clone)]
pub struct DistilledMemory {
    pub action: MemoryAction,
}

impl DistilledMemory {
    pub fn key(&self) -> &str {
        self.action.key()
    }
}

pub struct Distiller<C: LlmClient> {
    client: C,
}

impl<C: LlmClient> Distiller<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Run both passes over a conversation segment and return the accepted
    /// memory operations. Returns an empty list for a blank segment without
    /// making any LLM calls.
    pub async fn distill(
        &self,
        conversation_text: &str,
        existing_memories: &[Memory],
        start_turn: i64,
        end_turn: i64,
    ) -> Result<Vec<DistilledMemory>, LlmError> {
        if conversation_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let existing_text = if existing_memories.is_empty() {
            "(none yet - this is the start of the conversation)".to_string()
        } else {
            existing_memories
                .iter()
                .map(|m| {
                    format!(
                        "- [{}] {}: {} (confidence: {:.2}, from turn {})",
                        m.r#type, m.key, m.value, m.confidence, m.source_turn
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        info!(
            start_turn,
            end_turn,
            chars = conversation_text.len(),
            existing = existing_memories.len(),
            "distilling conversation segment"
        );

        let candidates = self
            .extract_candidates(conversation_text, &existing_text, start_turn, end_turn)
            .await?;
        if candidates.is_empty() {
            info!("pass 1 returned 0 candidates");
            return Ok(Vec::new());
        }
        info!(count = candidates.len(), "pass 1 extracted candidates");

        let validated = self.validate_candidates(candidates, conversation_text).await?;
        info!(accepted = validated.len(), "pass 2 validation complete");

        let existing_keys: HashSet<&str> = existing_memories.iter().map(|m| m.key.as_str()).collect();
        let corrected = validated
            .into_iter()
            .map(|mut dm| {
                if let MemoryAction::Keep { key, .. } = &dm.action {
                    if !existing_keys.contains(key.as_str()) {
                        debug!(%key, "correcting keep -> add for genuinely new memory");
                        dm = reclassify_keep_as_add(dm);
                    }
                }
                dm
            })
            .collect();

        Ok(corrected)
    }

    async fn extract_candidates(
        &self,
        conversation_text: &str,
        existing_text: &str,
        start_turn: i64,
        end_turn: i64,
    ) -> Result<Vec<DistilledMemory>, LlmError> {
        let prompt = render(
            EXTRACTION_PROMPT,
            &[
                ("existing_memories", existing_text),
                ("conversation", conversation_text),
                ("start_turn", &start_turn.to_string()),
                ("end_turn", &end_turn.to_string()),
            ],
        );

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(EXTRACTION_TEMPERATURE)
            .with_max_tokens(EXTRACTION_MAX_TOKENS)
            .json_mode();

        let response = complete_with_retry(&self.client, request).await?;
        Ok(parse_extraction_response(&response.content))
    }

    async fn validate_candidates(
        &self,
        candidates: Vec<DistilledMemory>,
        conversation_text: &str,
    ) -> Result<Vec<DistilledMemory>, LlmError> {
        let (keep_expire, to_validate): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|dm| matches!(dm.action, MemoryAction::Keep { .. } | MemoryAction::Expire { .. }));

        if to_validate.is_empty() {
            debug!("no candidates require validation (all keep/expire)");
            return Ok(keep_expire);
        }

        let candidates_json = serde_json::to_string_pretty(
            &to_validate
                .iter()
                .map(candidate_to_json)
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());

        let prompt = render(
            VALIDATION_PROMPT,
            &[("candidates_json", &candidates_json), ("conversation", conversation_text)],
        );

        let request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(VALIDATION_TEMPERATURE)
            .with_max_tokens(VALIDATION_MAX_TOKENS)
            .json_mode();

        let response = complete_with_retry(&self.client, request).await?;
        let verdicts = parse_validation_response(&response.content);

        let accepted_keys: HashSet<String> = verdicts
            .into_iter()
            .filter(|v| v.verdict == "accept")
            .map(|v| v.key)
            .collect();

        let mut result = keep_expire;
        result.extend(to_validate.into_iter().filter(|dm| accepted_keys.contains(dm.key())));
        Ok(result)
    }
}

fn reclassify_keep_as_add(dm: DistilledMemory) -> DistilledMemory {
    if let MemoryAction::Keep { key, reasoning } = dm.action {
        DistilledMemory {
            action: MemoryAction::Add {
                r#type: MemoryType::Fact,
                category: "general".to_string(),
                key,
                value: String::new(),
                confidence: 0.5,
                reasoning,
            },
        }
    } else {
        dm
    }
}

fn candidate_to_json(dm: &DistilledMemory) -> serde_json::Value {
    match &dm.action {
        MemoryAction::Add { r#type, category, key, value, confidence, reasoning } => serde_json::json!({
            "action": "add", "type": r#type.to_string(), "category": category,
            "key": key, "value": value, "confidence": confidence, "reasoning": reasoning,
        }),
        MemoryAction::Update { r#type, category, key, value, confidence, reasoning } => serde_json::json!({
            "action": "update", "type": r#type.to_string(), "category": category,
            "key": key, "value": value, "confidence": confidence, "reasoning": reasoning,
        }),
        MemoryAction::Keep { key, reasoning } => serde_json::json!({
            "action": "keep", "key": key, "reasoning": reasoning,
        }),
        MemoryAction::Expire { key, reasoning } => serde_json::json!({
            "action": "expire", "key": key, "reasoning": reasoning,
        }),
    }
}

fn parse_extraction_response(raw: &str) -> Vec<DistilledMemory> {
    let cleaned = strip_code_fences(raw);
    let envelope: Option<MemoriesEnvelope> =
        serde_json::from_str(&cleaned).ok().or_else(|| recover_truncated_memories(&cleaned));

    let Some(envelope) = envelope else {
        warn!("failed to parse distillation response");
        return Vec::new();
    };

    envelope.memories.into_iter().filter_map(raw_memory_to_distilled).collect()
}

fn parse_validation_response(raw: &str) -> Vec<Verdict> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str::<ValidationEnvelope>(&cleaned)
        .ok()
        .map(|e| e.validations)
        .unwrap_or_default()
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_open = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    without_open.trim().trim_end_matches("```").trim().to_string()
}

/// Attempt to recover a JSON object from a response truncated mid-stream:
/// trim a dangling comma/quote/ellipsis off the tail, then close any
/// unbalanced braces/brackets, trying a few plausible closing suffixes.
fn recover_truncated_json(text: &str) -> Option<serde_json::Value> {
    let trailing_comma = Regex::new(r#",\s*"[^"]*$"#).unwrap();
    let trailing_comma_bare = Regex::new(r",\s*$").unwrap();
    let trailing_dots = Regex::new(r"\.{2,}$").unwrap();

    let mut attempt = text.trim_end().to_string();
    attempt = trailing_comma.replace(&attempt, "").to_string();
    attempt = trailing_comma_bare.replace(&attempt, "").to_string();
    attempt = trailing_dots.replace(&attempt, "").to_string();

    let open_braces = attempt.matches('{').count() as i64 - attempt.matches('}').count() as i64;
    let open_brackets = attempt.matches('[').count() as i64 - attempt.matches(']').count() as i64;
    let brace_suffix = "}".repeat(open_braces.max(0) as usize);
    let bracket_suffix = "]".repeat(open_brackets.max(0) as usize);

    let strategies = [
        format!("{attempt}{bracket_suffix}{brace_suffix}"),
        format!("{attempt}}}{bracket_suffix}{brace_suffix}"),
        format!("{attempt}\"{bracket_suffix}{brace_suffix}"),
        format!("{attempt}\"}}{bracket_suffix}{brace_suffix}"),
    ];

    for candidate in &strategies {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            warn!("recovered truncated json via bracket-closing");
            return Some(value);
        }
    }
    None
}

fn recover_truncated_memories(text: &str) -> Option<MemoriesEnvelope> {
    if let Some(value) = recover_truncated_json(text) {
        if let Ok(envelope) = serde_json::from_value(value) {
            return Some(envelope);
        }
    }

    let pattern = Regex::new(
        r#"\{[^{}]*"action"\s*:\s*"[^"]+"[^{}]*"key"\s*:\s*"[^"]+"[^{}]*"value"\s*:\s*"[^"]+"[^{}]*\}"#,
    )
    .unwrap();
    let recovered: Vec<RawMemory> = pattern
        .find_iter(text)
        .filter_map(|m| serde_json::from_str(m.as_str()).ok())
        .collect();

    if recovered.is_empty() {
        None
    } else {
        warn!(count = recovered.len(), "recovered memories via regex extraction");
        Some(MemoriesEnvelope { memories: recovered })
    }
}

/// Memory value length cap (spec.md §3: "bounded to ≤ 200 characters after
/// filtering").
const MAX_VALUE_CHARS: usize = 200;

fn raw_memory_to_distilled(item: RawMemory) -> Option<DistilledMemory> {
    let value = match item.value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    let value: String = value.chars().take(MAX_VALUE_CHARS).collect();
    let confidence = item.confidence.clamp(0.0, 1.0);
    let key = item.key.trim().to_lowercase().replace(' ', "_");

    if key.is_empty() || key == "unknown" || value.is_empty() {
        return None;
    }

    let mem_type: MemoryType = item.r#type.parse().ok()?;

    let action = match item.action.as_str() {
        "add" => MemoryAction::Add {
            r#type: mem_type,
            category: item.category,
            key,
            value,
            confidence,
            reasoning: item.reasoning,
        },
        "update" => MemoryAction::Update {
            r#type: mem_type,
            category: item.category,
            key,
            value,
            confidence,
            reasoning: item.reasoning,
        },
        "keep" => MemoryAction::Keep { key, reasoning: item.reasoning },
        "expire" => MemoryAction::Expire { key, reasoning: item.reasoning },
        _ => return None,
    };

    Some(DistilledMemory { action })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fences_removes_json_fence() {
        let raw = "```json\n{\"memories\": []}\n```";
        assert_eq!(strip_code_fences(raw), "{\"memories\": []}");
    }

    #[test]
    fn parse_extraction_response_skips_unknown_type() {
        let raw = r#"{"memories": [{"action": "add", "type": "bogus", "key": "k", "value": "v"}]}"#;
        assert!(parse_extraction_response(raw).is_empty());
    }

    #[test]
    fn parse_extraction_response_rejects_placeholder_key() {
        let raw = r#"{"memories": [{"action": "add", "type": "fact", "key": "unknown", "value": "v"}]}"#;
        assert!(parse_extraction_response(raw).is_empty());
    }

    #[test]
    fn parse_extraction_response_accepts_well_formed_candidate() {
        let raw = r#"{"memories": [{"action": "add", "type": "preference", "category": "dietary",
            "key": "dietary_preference", "value": "vegetarian", "confidence": 0.9, "reasoning": "stated directly"}]}"#;
        let result = parse_extraction_response(raw);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key(), "dietary_preference");
    }

    #[test]
    fn recovers_truncated_json_by_closing_brackets() {
        let raw = r#"{"memories": [{"action": "add", "type": "fact", "key": "k", "value": "v"#;
        let envelope = recover_truncated_memories(raw);
        assert!(envelope.is_some());
    }

    #[test]
    fn recovers_via_regex_when_bracket_closing_fails() {
        let raw = r#"garbage prefix {"action": "add", "type": "fact", "key": "k1", "value": "v1"} trailing noise {{{"#;
        let envelope = recover_truncated_memories(raw);
        assert_eq!(envelope.unwrap().memories.len(), 1);
    }

    #[test]
    fn list_or_dict_values_are_json_stringified() {
        let raw = r#"{"memories": [{"action": "add", "type": "fact", "key": "tags", "value": ["a", "b"]}]}"#;
        let result = parse_extraction_response(raw);
        assert_eq!(result.len(), 1);
        if let MemoryAction::Add { value, .. } = &result[0].action {
            assert_eq!(value, "[\"a\",\"b\"]");
        } else {
            panic!("expected add action");
        }
    }
}
