//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions, applied in order against whatever `schema_version`
/// the opened database currently reports.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, profile, turns, FTS5 index",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Add last_used_turn for recency-weighted retrieval",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id          TEXT PRIMARY KEY,
    type        TEXT NOT NULL,
    category    TEXT NOT NULL,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    source_turn INTEGER NOT NULL,
    confidence  REAL DEFAULT 0.9,
    reasoning   TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    is_active   INTEGER DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_memories_key ON memories(key);
CREATE INDEX IF NOT EXISTS idx_memories_active ON memories(is_active);

CREATE TABLE IF NOT EXISTS profile (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    source_turn INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS turns (
    turn_id             INTEGER PRIMARY KEY,
    role                TEXT NOT NULL,
    content             TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    memories_retrieved  TEXT DEFAULT '[]'
);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    key, value, category, content=''
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// Adds `last_used_turn` for the Retriever's recency term. Checked against
/// `PRAGMA table_info` before the `ALTER TABLE` runs so a database that
/// already has the column (re-applied migration, or created fresh by a
/// version of this crate that already folds it into v1) is left untouched -
/// `ALTER TABLE ADD COLUMN` is not itself idempotent in SQLite.
const MIGRATION_V2_UP: &str = r#"
UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database.
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

fn has_column(conn: &rusqlite::Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .any(|name| name == column);
    Ok(found)
}

/// Apply pending migrations. Safe to call on every startup: migrations that
/// are already reflected in the schema (by version number, or - for the
/// `last_used_turn` column specifically - by direct inspection) are no-ops.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        if migration.version == 2 {
            if !has_column(conn, "memories", "last_used_turn")? {
                conn.execute_batch(
                    "ALTER TABLE memories ADD COLUMN last_used_turn INTEGER DEFAULT 0;",
                )?;
            } else {
                tracing::debug!("last_used_turn already present, skipping ALTER TABLE");
            }
        }

        conn.execute_batch(migration.up)?;
        applied += 1;
    }

    Ok(applied)
}
