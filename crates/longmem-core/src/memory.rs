//! Core data model
//!
//! Defines the memory record shape, the distillation output the Distiller
//! produces, and the small set of closed enums that keep the rest of the
//! crate from stringly-typing its way through types and actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a stored memory, mirroring the six categories the
/// distillation prompt is instructed to choose from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Preference,
    Fact,
    Commitment,
    Constraint,
    Entity,
    Instruction,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Preference => write!(f, "preference"),
            MemoryType::Fact => write!(f, "fact"),
            MemoryType::Commitment => write!(f, "commitment"),
            MemoryType::Constraint => write!(f, "constraint"),
            MemoryType::Entity => write!(f, "entity"),
            MemoryType::Instruction => write!(f, "instruction"),
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(MemoryType::Preference),
            "fact" => Ok(MemoryType::Fact),
            "commitment" => Ok(MemoryType::Commitment),
            "constraint" => Ok(MemoryType::Constraint),
            "entity" => Ok(MemoryType::Entity),
            "instruction" => Ok(MemoryType::Instruction),
            _ => Err(format!("unknown memory type: {}", s)),
        }
    }
}

/// A durable, stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub r#type: MemoryType,
    pub category: String,
    pub key: String,
    pub value: String,
    pub confidence: f32,
    pub reasoning: String,
    pub source_turn: i64,
    pub last_used_turn: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A mutation the Distiller wants applied to the store, one tagged variant
/// per verb the extraction/validation protocol is allowed to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MemoryAction {
    Add {
        r#type: MemoryType,
        category: String,
        key: String,
        value: String,
        confidence: f32,
        reasoning: String,
    },
    Update {
        r#type: MemoryType,
        category: String,
        key: String,
        value: String,
        confidence: f32,
        reasoning: String,
    },
    Keep {
        key: String,
        reasoning: String,
    },
    Expire {
        key: String,
        reasoning: String,
    },
}

impl MemoryAction {
    pub fn key(&self) -> &str {
        match self {
            MemoryAction::Add { key, .. } => key,
            MemoryAction::Update { key, .. } => key,
            MemoryAction::Keep { key, .. } => key,
            MemoryAction::Expire { key, .. } => key,
        }
    }
}

/// A single conversational turn, kept until consolidation/flush retires it
/// from the live context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// IDs of the memories retrieved for this turn (spec.md §3: the
    /// TurnRecord carries "list of memory IDs retrieved at that turn").
    pub memories_retrieved: Vec<String>,
}

/// A memory plus the relevance score the Retriever assigned it for a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub memory: Memory,
    pub score: f32,
    /// The RRF-normalised component of `score`, kept alongside it so ties on
    /// the final score can still break by RRF rank before falling back to
    /// `updated_at`/`id` (spec.md §4.4).
    pub rrf_normalized: f32,
}

/// Stopwords dropped by the keyword tokeniser before an FTS5 MATCH query is
/// built. Non-normative (spec.md §9) - close enough to the original's list
/// to produce the same practical keyword recall.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "must", "can", "this",
    "that", "these", "those", "i", "you", "he", "she", "it", "we", "they",
    "me", "him", "her", "us", "them", "my", "your", "his", "its", "our",
    "their", "what", "which", "who", "whom", "whose", "when", "where",
    "why", "how", "all", "each", "every", "both", "few", "more", "most",
    "other", "some", "such", "no", "nor", "not", "only", "own", "same",
    "so", "than", "too", "very", "just", "about", "above", "after",
    "again", "against", "below", "between", "into", "through", "during",
    "before", "above", "to", "from", "up", "down", "in", "out", "on",
    "off", "over", "under", "tell", "know", "like", "want", "get", "say",
    "user", "users",
];
