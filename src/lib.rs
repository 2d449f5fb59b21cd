//! Semantic storage and retrieval for captured text.
//!
//! Cairn keeps a durable content store (text, provenance, tags, timestamps,
//! access counters) next to a fixed-dimension vector store, and indexes the
//! vectors with an HNSW graph for approximate nearest-neighbor search. Queries
//! run as pure similarity, keyword, hybrid (reciprocal rank fusion), or through
//! cue-phrase inferred tag and time filters. Capacity eviction, age-based
//! retention and an orphan sweep keep both stores consistent.
//!
//! # Architecture
//!
//! - **Storage**: one SQLite database holding the `content`, `content_tags`,
//!   `vectors` and `index_nodes` tables, so every write is one transaction
//! - **Index**: in-memory HNSW graph with cosine distance, persisted per node
//! - **Search**: cosine re-rank, keyword substring match, and RRF fusion
//! - **Embeddings**: injected through [`embedding::EmbeddingProvider`]
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Connection setup, schema, migrations, health checks |
//! | [`embedding`] | Embedding provider seam and the built-in hashing embedder |
//! | [`engine`] | Async, cloneable handle over one open store |
//! | [`error`] | Typed engine errors |
//! | [`index`] | HNSW graph, search and persistence |
//! | [`memory`] | Store, search, filter, retention and stats operations |
//! | [`similarity`] | Vector math |

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod memory;
pub mod similarity;

pub use engine::{EngineSettings, MemoryEngine};
pub use error::{StoreError, StoreResult};
