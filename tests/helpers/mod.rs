#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use cairn::db;
use cairn::embedding::hashing::HashingEmbedder;
use cairn::memory::types::{Source, StoreRequest};
use cairn::{EngineSettings, MemoryEngine};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

/// Embedding dimension used by every integration test.
pub const DIM: usize = 16;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_in_memory().unwrap()
}

/// Generate a deterministic embedding with a spike at position `seed`.
/// Distinct seeds below `DIM` produce orthogonal vectors.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// An embedding close to `test_embedding(seed)` but leaning toward `toward`.
pub fn near_embedding(seed: usize, toward: usize, weight: f32) -> Vec<f32> {
    let mut v = test_embedding(seed);
    v[toward % DIM] += weight;
    v
}

/// Settings with the given capacity and retention window; 0 capacity is unbounded.
pub fn settings(capacity: usize, retention_days: u64) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.retention.capacity = capacity;
    settings.retention.retention_days = retention_days;
    settings.retrieval.similarity_threshold = 0.0;
    settings
}

pub async fn memory_engine(settings: EngineSettings) -> MemoryEngine {
    MemoryEngine::open_in_memory(settings, Arc::new(HashingEmbedder::new(DIM)))
        .await
        .unwrap()
}

pub async fn file_engine(path: &Path, settings: EngineSettings) -> MemoryEngine {
    MemoryEngine::open(path, settings, Arc::new(HashingEmbedder::new(DIM)))
        .await
        .unwrap()
}

/// A request with a fixed id, clipboard source and the given age.
pub fn request(id: &str, text: &str, embedding: Vec<f32>, age: Duration) -> StoreRequest {
    StoreRequest::new(text, embedding, Source::Clipboard)
        .with_id(id)
        .with_timestamp(Utc::now() - age)
}

/// Store `request` and return its id.
pub async fn put(engine: &MemoryEngine, request: StoreRequest) -> String {
    engine.store(request).await.unwrap()
}

/// Count rows in `table`.
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

/// Vector and index rows whose content row is gone.
pub fn orphan_rows(conn: &Connection) -> i64 {
    let vectors: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM vectors v WHERE NOT EXISTS (SELECT 1 FROM content c WHERE c.id = v.id)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let nodes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM index_nodes n WHERE NOT EXISTS (SELECT 1 FROM content c WHERE c.id = n.id)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    vectors + nodes
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}
