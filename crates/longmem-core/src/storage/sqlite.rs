//! SQLite Storage Implementation
//!
//! Core storage layer: the `memories`/`profile`/`turns` tables, the FTS5
//! keyword index and the in-memory HNSW vector index, kept consistent with
//! each other on every mutating call.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::embeddings::{cosine_similarity, Embedder};
use crate::memory::{Memory, MemoryType, TurnRecord};
use crate::search::{build_fts_query, VectorIndex, VectorIndexConfig};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("memory not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("vector search error: {0}")]
    VectorSearch(String),
    #[error("initialization error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent hybrid (vector + keyword) store with integrated embedding
/// generation.
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making `Store` `Send + Sync` so callers can share
/// it behind `Arc<Store>` instead of `Arc<Mutex<Store>>`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    embedder: Box<dyn Embedder>,
    vector_index: Mutex<VectorIndex>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Store {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Default per-platform database path: `<data dir>/longmem.db`, with
    /// owner-only permissions on Unix.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "longmem", "core")
            .ok_or_else(|| StoreError::Init("could not determine project directories".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(data_dir, perms);
        }
        Ok(data_dir.join("longmem.db"))
    }

    /// Open (creating if necessary) a store at `db_path`, or at the default
    /// platform location if `None`.
    pub fn open(db_path: Option<PathBuf>, embedder: Box<dyn Embedder>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let writer_conn = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        let vector_index = VectorIndex::with_config(VectorIndexConfig {
            dimensions: embedder.dimensions(),
            ..Default::default()
        })
        .map_err(|e| StoreError::Init(format!("failed to create vector index: {}", e)))?;

        let query_cache = Mutex::new(LruCache::new(NonZeroUsize::new(256).expect("256 is non-zero")));

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            embedder,
            vector_index: Mutex::new(vector_index),
            query_cache,
        };

        store.load_embeddings_into_index()?;
        Ok(store)
    }

    fn load_embeddings_into_index(&self) -> Result<()> {
        let ids_and_text: Vec<(String, String, String)> = {
            let reader = self
                .reader
                .lock()
                .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
            let mut stmt = reader.prepare(
                "SELECT id, key, value FROM memories WHERE is_active = 1",
            )?;
            stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .filter_map(|r| r.ok())
            .collect()
        };

        let mut index = self
            .vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".into()))?;

        for (id, key, value) in ids_and_text {
            let text = format!("{}: {}", key, value);
            match self.embedder.embed(&text) {
                Ok(vector) => {
                    if let Err(e) = index.add(&id, &vector) {
                        tracing::warn!("failed to load embedding for {}: {}", id, e);
                    }
                }
                Err(e) => tracing::warn!("failed to embed existing memory {}: {}", id, e),
            }
        }

        Ok(())
    }

    fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(v) = cache.get(text) {
                return Ok(v.clone());
            }
        }
        let vector = self
            .embedder
            .embed(text)
            .map_err(|e| StoreError::Embedding(e.to_string()))?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Insert a new memory into the primary table, the FTS index, the
    /// vector index, and (for preference/fact/constraint types) the profile
    /// projection. All four writes happen inside one transaction.
    pub fn add_memory(
        &self,
        r#type: MemoryType,
        category: &str,
        key: &str,
        value: &str,
        confidence: f32,
        reasoning: &str,
        turn_id: i64,
    ) -> Result<Memory> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let type_str = r#type.to_string();

        // Compute and commit the vector entry *before* touching SQL: if the
        // embedding call or the vector index insert fails, nothing has been
        // persisted yet, so the add fails atomically (spec.md §4.1: "If the
        // embedding call fails, the add fails atomically").
        let embed_text = format!("{}: {}", key, value);
        let vector = self
            .embedder
            .embed(&embed_text)
            .map_err(|e| StoreError::Embedding(e.to_string()))?;

        let mut index = self
            .vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".into()))?;
        index.add(&id, &vector).map_err(|e| StoreError::VectorSearch(e.to_string()))?;

        let sql_result: Result<()> = (|| {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
            let tx = writer.transaction()?;

            tx.execute(
                "INSERT INTO memories
                    (id, type, category, key, value, source_turn, confidence,
                     reasoning, created_at, updated_at, is_active, last_used_turn)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 1, 0)",
                params![id, type_str, category, key, value, turn_id, confidence, reasoning, now.to_rfc3339()],
            )?;

            let rowid = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO memories_fts(rowid, key, value, category) VALUES (?1, ?2, ?3, ?4)",
                params![rowid, key, value, category],
            )?;

            if matches!(r#type, MemoryType::Preference | MemoryType::Fact | MemoryType::Constraint) {
                tx.execute(
                    "INSERT OR REPLACE INTO profile (key, value, updated_at, source_turn)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, value, now.to_rfc3339(), turn_id],
                )?;
            }

            tx.commit()?;
            Ok(())
        })();

        if let Err(e) = sql_result {
            // The vector entry was already written; undo it so a SQL failure
            // doesn't leave an orphaned vector with no corresponding row.
            let _ = index.remove(&id);
            return Err(e);
        }
        drop(index);

        tracing::debug!(key, %id, "added memory");

        Ok(Memory {
            id,
            r#type,
            category: category.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            confidence,
            reasoning: reasoning.to_string(),
            source_turn: turn_id,
            last_used_turn: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Soft-delete every active memory with `key`, keeping the primary
    /// table, FTS index, vector index and profile projection in sync: the
    /// strict invariant is at most one active memory per key everywhere,
    /// not just in the primary table (spec.md §3: deactivation must
    /// atomically hide the memory from all query paths).
    pub fn deactivate_by_key(&self, key: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
        let tx = writer.transaction()?;

        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM memories WHERE key = ?1 AND is_active = 1")?;
            stmt.query_map(params![key], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect()
        };

        tx.execute(
            "UPDATE memories SET is_active = 0, updated_at = ?1 WHERE key = ?2 AND is_active = 1",
            params![Utc::now().to_rfc3339(), key],
        )?;
        tx.execute(
            "DELETE FROM memories_fts WHERE rowid IN (SELECT rowid FROM memories WHERE key = ?1 AND is_active = 0)",
            params![key],
        )?;
        tx.execute("DELETE FROM profile WHERE key = ?1", params![key])?;

        // Remove the vector entries before committing: a removal failure must
        // abort the whole deactivation (the transaction rolls back on drop
        // without a `commit()` call) rather than leave a stale vector entry
        // for a memory the SQL side now reports inactive (spec.md §3:
        // "no entry for any inactive memory").
        {
            let mut index = self
                .vector_index
                .lock()
                .map_err(|_| StoreError::Init("vector index lock poisoned".into()))?;
            for id in &ids {
                index.remove(id).map_err(|e| StoreError::VectorSearch(e.to_string()))?;
            }
        }

        tx.commit()?;

        tracing::debug!(key, "deactivated memory");
        Ok(())
    }

    pub fn deactivate_by_id(&self, id: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
        let tx = writer.transaction()?;

        let key: Option<String> = tx
            .query_row("SELECT key FROM memories WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;

        tx.execute(
            "UPDATE memories SET is_active = 0, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        tx.execute(
            "DELETE FROM memories_fts WHERE rowid IN (SELECT rowid FROM memories WHERE id = ?1)",
            params![id],
        )?;
        if let Some(k) = &key {
            // Only the rare key with zero surviving active memories loses
            // its profile row; `find_by_key` still enforces uniqueness.
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM memories WHERE key = ?1 AND is_active = 1",
                params![k],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                tx.execute("DELETE FROM profile WHERE key = ?1", params![k])?;
            }
        }

        // Remove the vector entry before committing, for the same reason as
        // `deactivate_by_key`: a removal failure must abort the deactivation
        // rather than leave a stale vector entry behind.
        self.vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".into()))?
            .remove(id)
            .map_err(|e| StoreError::VectorSearch(e.to_string()))?;

        tx.commit()?;
        Ok(())
    }

    /// Record a memory's use during retrieval, for the Retriever's recency
    /// term and the Consolidator's staleness decay.
    pub fn touch_memory(&self, id: &str, turn_id: i64) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
        writer.execute(
            "UPDATE memories SET last_used_turn = ?1 WHERE id = ?2",
            params![turn_id, id],
        )?;
        Ok(())
    }

    pub fn set_confidence(&self, id: &str, confidence: f32) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
        writer.execute(
            "UPDATE memories SET confidence = ?1, updated_at = ?2 WHERE id = ?3",
            params![confidence, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn get_active_memories(&self) -> Result<Vec<Memory>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT id, type, category, key, value, source_turn, confidence,
                    reasoning, created_at, updated_at, is_active, last_used_turn
             FROM memories WHERE is_active = 1 ORDER BY confidence DESC",
        )?;
        let rows = stmt
            .query_map([], row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Look up a memory by id. Mirrors spec.md §4.1 (`get_by_id`): active
    /// only, so a soft-deleted id resolves to `None` on every query path.
    pub fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        reader
            .query_row(
                "SELECT id, type, category, key, value, source_turn, confidence,
                        reasoning, created_at, updated_at, is_active, last_used_turn
                 FROM memories WHERE id = ?1 AND is_active = 1",
                params![id],
                row_to_memory,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Look up a memory by id regardless of active state, for maintenance
    /// paths (e.g. confirming a deactivation took effect) that must see
    /// soft-deleted rows. Never used by a retrieval/profile query path.
    pub fn get_memory_by_id_any(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        reader
            .query_row(
                "SELECT id, type, category, key, value, source_turn, confidence,
                        reasoning, created_at, updated_at, is_active, last_used_turn
                 FROM memories WHERE id = ?1",
                params![id],
                row_to_memory,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Look up the single active memory for `key`, if any. The store enforces
    /// at most one active row per key, so this never needs to disambiguate.
    pub fn find_by_key(&self, key: &str) -> Result<Option<Memory>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        reader
            .query_row(
                "SELECT id, type, category, key, value, source_turn, confidence,
                        reasoning, created_at, updated_at, is_active, last_used_turn
                 FROM memories WHERE key = ?1 AND is_active = 1",
                params![key],
                row_to_memory,
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn get_memory_embedding(&self, key: &str, value: &str) -> Result<Vec<f32>> {
        let text = format!("{}: {}", key, value);
        self.embed_cached(&text)
    }

    pub fn get_profile(&self) -> Result<HashMap<String, String>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        let mut stmt = reader.prepare("SELECT key, value FROM profile")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn active_count(&self) -> Result<i64> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        reader
            .query_row("SELECT COUNT(*) FROM memories WHERE is_active = 1", [], |row| row.get(0))
            .map_err(StoreError::from)
    }

    /// Nearest neighbours by embedding similarity, returned as
    /// `(memory_id, l2_distance)` ordered closest first.
    pub fn search_vector(&self, query: &str, top_k: usize) -> Result<Vec<(String, f32)>> {
        let embedding = self.embed_cached(query)?;
        self.vector_index
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".into()))?
            .search(&embedding, top_k)
            .map_err(|e| StoreError::VectorSearch(e.to_string()))
    }

    /// Keyword search via FTS5, returned as `(memory_id, rank)` ordered by
    /// FTS5's bm25-derived rank (more negative is more relevant).
    pub fn search_fts(&self, query: &str, top_k: usize) -> Result<Vec<(String, f32)>> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(vec![]);
        };

        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT rowid, rank FROM memories_fts WHERE memories_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let rowid_ranks: Vec<(i64, f32)> = stmt
            .query_map(params![fts_query, top_k as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut results = Vec::with_capacity(rowid_ranks.len());
        for (rowid, rank) in rowid_ranks {
            if let Some(id) = reader
                .query_row("SELECT id FROM memories WHERE rowid = ?1", params![rowid], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?
            {
                results.push((id, rank));
            }
        }
        Ok(results)
    }

    /// Append a turn to the log, along with the IDs of the memories that
    /// were retrieved and surfaced into the prompt for it (spec.md §3:
    /// TurnRecord carries "list of memory IDs retrieved at that turn").
    pub fn log_turn(&self, turn_id: i64, role: &str, content: &str, memories_retrieved: &[String]) -> Result<()> {
        let retrieved_json = serde_json::to_string(memories_retrieved).unwrap_or_else(|_| "[]".to_string());
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))?;
        writer.execute(
            "INSERT OR REPLACE INTO turns (turn_id, role, content, created_at, memories_retrieved)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![turn_id, role, content, Utc::now().to_rfc3339(), retrieved_json],
        )?;
        Ok(())
    }

    pub fn get_turns_since(&self, since_turn_id: i64) -> Result<Vec<TurnRecord>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        let mut stmt = reader.prepare(
            "SELECT turn_id, role, content, created_at, memories_retrieved FROM turns
             WHERE turn_id > ?1 ORDER BY turn_id ASC",
        )?;
        let rows = stmt
            .query_map(params![since_turn_id], |row| {
                let created_at: String = row.get(3)?;
                let retrieved_json: String = row.get(4)?;
                let memories_retrieved: Vec<String> = serde_json::from_str(&retrieved_json).unwrap_or_default();
                Ok(TurnRecord {
                    turn_id: row.get(0)?,
                    role: row.get(1)?,
                    content: row.get(2)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    memories_retrieved,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_last_turn_id(&self) -> Result<i64> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))?;
        reader
            .query_row("SELECT COALESCE(MAX(turn_id), 0) FROM turns", [], |row| row.get(0))
            .map_err(StoreError::from)
    }

    /// Render a human-readable markdown snapshot of every active memory and
    /// the profile projection to `snapshots/turn_{turn_id:05}.md`.
    pub fn write_snapshot(&self, turn_id: i64, snapshot_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(snapshot_dir)?;
        let memories = self.get_active_memories()?;
        let profile = self.get_profile()?;

        let path = snapshot_dir.join(format!("turn_{:05}.md", turn_id));
        let mut out = format!(
            "# Memory Snapshot — Turn {}\nGenerated: {}\n\n",
            turn_id,
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );

        if !profile.is_empty() {
            out.push_str("## Profile\n");
            let mut keys: Vec<_> = profile.keys().collect();
            keys.sort();
            for k in keys {
                out.push_str(&format!("- **{}**: {}\n", k, profile[k]));
            }
            out.push('\n');
        }

        if !memories.is_empty() {
            let mut sorted = memories.clone();
            sorted.sort_by(|a, b| (a.r#type.to_string(), &a.key).cmp(&(b.r#type.to_string(), &b.key)));
            let mut current_type: Option<String> = None;
            for m in &sorted {
                let type_str = m.r#type.to_string();
                if current_type.as_deref() != Some(type_str.as_str()) {
                    out.push_str(&format!("## {}s\n", capitalize(&type_str)));
                    current_type = Some(type_str);
                }
                out.push_str(&format!(
                    "- **{}**: {} (conf: {:.2}, turn: {})\n",
                    m.key, m.value, m.confidence, m.source_turn
                ));
            }
            out.push('\n');
        }

        out.push_str(&format!("\nTotal active: {}\n", memories.len()));
        std::fs::write(&path, out)?;
        Ok(path)
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
        None => String::new(),
    }
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let type_str: String = row.get(1)?;
    let r#type: MemoryType = type_str.parse().unwrap_or(MemoryType::Fact);
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(Memory {
        id: row.get(0)?,
        r#type,
        category: row.get(2)?,
        key: row.get(3)?,
        value: row.get(4)?,
        source_turn: row.get(5)?,
        confidence: row.get(6)?,
        reasoning: row.get(7)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        is_active: row.get::<_, i64>(10)? != 0,
        last_used_turn: row.get(11)?,
    })
}

/// Exposes `cosine_similarity` re-export for the Consolidator's duplicate
/// detection so it doesn't need to depend on `crate::embeddings` directly.
pub fn memory_cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b)
}
