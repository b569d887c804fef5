//! Long-form conversational memory for bounded-context chat agents.
//!
//! Detects when a conversation's context window is approaching its limit,
//! distills durable facts out of the segment about to be dropped, persists
//! them in a hybrid (vector + keyword) store, and retrieves them back in on
//! later turns. See [`agent::Agent`] for the orchestrator that wires these
//! pieces together, or use the modules directly for a custom turn loop.

pub mod agent;
pub mod consolidator;
pub mod context;
pub mod distiller;
pub mod embeddings;
pub mod llm;
pub mod memory;
pub mod prompts;
pub mod retriever;
pub mod search;
pub mod storage;

pub use agent::{Agent, AgentConfig, AgentError, ChatOutcome};
pub use consolidator::{Consolidator, ConsolidationReport};
pub use context::ContextManager;
pub use distiller::{DistilledMemory, Distiller};
pub use embeddings::{Embedder, EmbeddingError};
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, OpenAiCompatibleClient};
pub use memory::{Memory, MemoryAction, MemoryType, RetrievalResult, TurnRecord};
pub use retriever::Retriever;
pub use storage::{Store, StoreError};
