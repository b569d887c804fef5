//! Conversation orchestration: ties context management, retrieval,
//! distillation, and consolidation into a single per-turn lifecycle.
//!
//! Per turn: check whether context needs flushing, retrieve relevant
//! memories, rebuild the system prompt, run inference, log the turn.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::consolidator::Consolidator;
use crate::context::ContextManager;
use crate::distiller::{DistilledMemory, Distiller};
use crate::llm::{complete_with_retry, ChatMessage as LlmChatMessage, ChatRequest, LlmClient, LlmError};
use crate::memory::{Memory, MemoryAction};
use crate::prompts::{render, MEMORIES_SECTION, PROFILE_SECTION, SYSTEM_PROMPT_TEMPLATE};
use crate::retriever::Retriever;
use crate::storage::{Store, StoreError};

/// Response-token allowance reserved when estimating whether the next turn
/// will overflow the context window.
const RESPONSE_TOKEN_ESTIMATE: usize = 300;

#[derive(Debug)]
pub enum AgentError {
    Store(StoreError),
    Llm(LlmError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Store(e) => write!(f, "{e}"),
            AgentError::Llm(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for AgentError {}
impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::Store(e)
    }
}
impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::Llm(e)
    }
}

#[derive(Debug, Clone)]
pub struct ActiveMemorySummary {
    pub memory_id: String,
    pub content: String,
    pub origin_turn: i64,
    pub r#type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: String,
    pub turn_id: i64,
    pub context_utilization: f32,
    pub context_tokens: usize,
    pub flush_triggered: bool,
    pub total_flushes: u64,
    pub active_memories: Vec<ActiveMemorySummary>,
    pub total_memories: i64,
}

/// Every tunable knob spec.md names a default for, made explicit and
/// overridable rather than hard-coded (SPEC_FULL.md §10).
pub struct AgentConfig {
    pub context_limit: usize,
    pub flush_threshold: f32,
    pub keep_last_turns: usize,
    pub consolidate_every_n_flushes: u64,
    pub top_k: usize,
    pub min_score: f32,
    pub snapshot_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            context_limit: 8192,
            flush_threshold: 0.70,
            keep_last_turns: 4,
            consolidate_every_n_flushes: 5,
            top_k: 5,
            min_score: 0.01,
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}

/// A conversational agent with long-form memory, generic over the chat
/// backend so distillation and turn inference can share one `LlmClient`
/// implementation or use two different providers.
pub struct Agent<C: LlmClient> {
    store: Store,
    distiller: Distiller<Arc<C>>,
    llm: Arc<C>,
    ctx: ContextManager,
    config: AgentConfig,
    turn_id: i64,
    segment_start_turn: i64,
    total_flushes: u64,
}

impl<C: LlmClient> Agent<C> {
    pub fn new(store: Store, llm: C, config: AgentConfig) -> Result<Self, AgentError> {
        let turn_id = store.get_last_turn_id()?;
        let segment_start_turn = (turn_id + 1).max(1);
        let llm = Arc::new(llm);

        let mut ctx = ContextManager::new(config.context_limit, config.flush_threshold, config.keep_last_turns);
        let mut agent = Self {
            distiller: Distiller::new(Arc::clone(&llm)),
            llm,
            ctx: {
                let profile = store.get_profile()?;
                ctx.set_system_prompt(build_system_prompt(&profile, &[]));
                ctx
            },
            store,
            config,
            turn_id,
            segment_start_turn,
            total_flushes: 0,
        };
        agent.rebuild_system_prompt(&[])?;
        Ok(agent)
    }

    /// Process one user message end to end: flush if needed, retrieve,
    /// rebuild the prompt, call the model, log the turn.
    pub async fn chat(&mut self, user_message: &str) -> Result<ChatOutcome, AgentError> {
        self.turn_id += 1;
        let mut flush_triggered = false;

        let incoming_estimate = crate::context::count_tokens(user_message) + RESPONSE_TOKEN_ESTIMATE;
        if self.ctx.needs_flush(incoming_estimate) && self.ctx.message_count() > 0 {
            self.flush().await?;
            flush_triggered = true;
        }

        let retriever = Retriever::new(&self.store).with_min_score(self.config.min_score);
        let results = retriever.retrieve(user_message, self.config.top_k, self.turn_id)?;
        let retrieved: Vec<Memory> = results.into_iter().map(|r| r.memory).collect();

        for memory in &retrieved {
            self.store.touch_memory(&memory.id, self.turn_id)?;
        }

        self.rebuild_system_prompt(&retrieved)?;
        self.ctx.add_message("user", user_message);

        let request = ChatRequest::new(self.ctx.messages_for_api().into_iter().map(to_llm_message).collect())
            .with_temperature(0.7)
            .with_max_tokens(1024);
        let response = complete_with_retry(&self.llm, request).await?;

        self.ctx.add_message("assistant", response.content.clone());
        let retrieved_ids: Vec<String> = retrieved.iter().map(|m| m.id.clone()).collect();
        self.store.log_turn(self.turn_id, "user", user_message, &retrieved_ids)?;

        info!(turn_id = self.turn_id, flush_triggered, "processed turn");

        Ok(ChatOutcome {
            response: response.content,
            turn_id: self.turn_id,
            context_utilization: self.ctx.utilization(),
            context_tokens: self.ctx.total_tokens(),
            flush_triggered,
            total_flushes: self.total_flushes,
            active_memories: retrieved
                .iter()
                .map(|m| ActiveMemorySummary {
                    memory_id: m.id.clone(),
                    content: format!("{}: {}", m.key, m.value),
                    origin_turn: m.source_turn,
                    r#type: m.r#type.to_string(),
                    confidence: m.confidence,
                })
                .collect(),
            total_memories: self.store.active_count()?,
        })
    }

    /// Force distillation of the current segment without waiting for the
    /// context window to fill up.
    pub async fn manual_distill(&mut self) -> Result<(i64, i64), AgentError> {
        if self.ctx.message_count() == 0 {
            return Ok((0, self.store.active_count()?));
        }
        let before = self.store.active_count()?;
        self.flush().await?;
        let after = self.store.active_count()?;
        Ok((after - before, after))
    }

    async fn flush(&mut self) -> Result<(), AgentError> {
        let conversation_text = self.ctx.conversation_text();
        let existing_memories = self.store.get_active_memories()?;

        let distilled = self
            .distiller
            .distill(&conversation_text, &existing_memories, self.segment_start_turn, self.turn_id)
            .await?;

        self.apply_distilled(distilled)?;
        self.store.write_snapshot(self.turn_id, &self.config.snapshot_dir)?;

        self.rebuild_system_prompt(&[])?;
        let system_prompt = build_system_prompt(&self.store.get_profile()?, &[]);
        self.ctx.reset(system_prompt);
        self.segment_start_turn = self.turn_id;
        self.total_flushes += 1;

        if self.total_flushes % self.config.consolidate_every_n_flushes == 0 {
            let report = Consolidator::new(&self.store).run_consolidation(self.turn_id)?;
            info!(
                merged = report.duplicates_merged,
                decayed = report.memories_decayed,
                expired = report.memories_expired,
                "periodic consolidation"
            );
        }

        Ok(())
    }

    fn apply_distilled(&mut self, distilled: Vec<DistilledMemory>) -> Result<(), AgentError> {
        info!(count = distilled.len(), "applying distilled memory operations");
        for dm in distilled {
            match dm.action {
                MemoryAction::Add { r#type, category, key, value, confidence, reasoning } => {
                    if let Some(existing) = self.store.find_by_key(&key)? {
                        if existing.value.trim().eq_ignore_ascii_case(value.trim()) {
                            continue;
                        }
                        self.store.deactivate_by_key(&key)?;
                    }
                    self.store.add_memory(r#type, &category, &key, &value, confidence, &reasoning, self.turn_id)?;
                }
                MemoryAction::Update { r#type, category, key, value, confidence, reasoning } => {
                    self.store.deactivate_by_key(&key)?;
                    self.store.add_memory(r#type, &category, &key, &value, confidence, &reasoning, self.turn_id)?;
                }
                MemoryAction::Expire { key, .. } => {
                    self.store.deactivate_by_key(&key)?;
                }
                MemoryAction::Keep { .. } => {}
            }
        }
        Ok(())
    }

    fn rebuild_system_prompt(&mut self, query_memories: &[Memory]) -> Result<(), AgentError> {
        let profile = self.store.get_profile()?;
        let prompt = build_system_prompt(&profile, query_memories);
        self.ctx.set_system_prompt(prompt);
        Ok(())
    }

    pub fn get_all_memories(&self) -> Result<Vec<Memory>, AgentError> {
        Ok(self.store.get_active_memories()?)
    }

    /// Write a memory snapshot for the current turn on demand, without
    /// waiting for the next flush.
    pub fn save_snapshot(&self) -> Result<PathBuf, AgentError> {
        Ok(self.store.write_snapshot(self.turn_id, &self.config.snapshot_dir)?)
    }
}

fn build_system_prompt(profile: &std::collections::HashMap<String, String>, query_memories: &[Memory]) -> String {
    let profile_section = if profile.is_empty() {
        String::new()
    } else {
        let mut keys: Vec<&String> = profile.keys().collect();
        keys.sort();
        let profile_yaml = keys.iter().map(|k| format!("- {}: {}", k, profile[*k])).collect::<Vec<_>>().join("\n");
        render(PROFILE_SECTION, &[("profile_yaml", &profile_yaml)])
    };

    let memories_section = if query_memories.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = query_memories
            .iter()
            .filter(|m| !profile.contains_key(&m.key))
            .map(|m| format!("- [{}] {}: {}", m.r#type, m.key, m.value))
            .collect();
        if lines.is_empty() {
            String::new()
        } else {
            render(MEMORIES_SECTION, &[("memories_list", &lines.join("\n"))])
        }
    };

    render(SYSTEM_PROMPT_TEMPLATE, &[("profile_section", &profile_section), ("memories_section", &memories_section)])
}

fn to_llm_message(m: crate::context::Message) -> LlmChatMessage {
    match m.role.as_str() {
        "system" => LlmChatMessage::system(m.content),
        "assistant" => LlmChatMessage::assistant(m.content),
        _ => LlmChatMessage::user(m.content),
    }
}
