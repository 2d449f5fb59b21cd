//! SQL DDL for all cairn tables.
//!
//! Two logical stores live in one database so a write is one transaction:
//! the content store (`content`, `content_tags`) and the vector store
//! (`vectors`, `index_nodes`). `schema_meta` records the schema version and the
//! fixed embedding dimension. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization.
//!
//! `vectors` and `index_nodes` carry no foreign key to `content`: the orphan
//! sweep in [`crate::memory::retention`] is the consistency mechanism between
//! the two stores.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Content store
CREATE TABLE IF NOT EXISTS content (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    source_kind TEXT NOT NULL CHECK(source_kind IN
        ('clipboard','screen_capture','email','browser','meeting','manual')),
    source TEXT NOT NULL,
    metadata TEXT,
    timestamp_ms INTEGER NOT NULL,
    user_created INTEGER NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_content_timestamp ON content(timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_content_source ON content(source_kind);

CREATE TABLE IF NOT EXISTS content_tags (
    content_id TEXT NOT NULL REFERENCES content(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (content_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_content_tags_tag ON content_tags(tag);

-- Vector store
CREATE TABLE IF NOT EXISTS vectors (
    id TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    magnitude REAL NOT NULL
);

-- HNSW graph nodes; connections is a JSON array of per-level id arrays
CREATE TABLE IF NOT EXISTS index_nodes (
    id TEXT PRIMARY KEY,
    level INTEGER NOT NULL,
    connections TEXT NOT NULL,
    is_entry_point INTEGER NOT NULL DEFAULT 0
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
