//! Persistence layer: schema migrations and the SQLite-backed `Store`.

pub mod migrations;
mod sqlite;

pub use sqlite::{memory_cosine_similarity, Store, StoreError};
