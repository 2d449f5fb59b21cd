//! HNSW approximate nearest-neighbor index.
//!
//! The graph lives in memory together with a cache of every embedding and its
//! magnitude. Mutations mark nodes dirty; [`HnswIndex::persist`] writes them to
//! the `index_nodes` table inside the caller's transaction, so the graph on disk
//! always commits together with the content and vector rows it describes.
//!
//! Traversal and re-rank both use cosine distance (`1 - cosine_similarity`).

mod hnsw;
mod persistence;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;

pub use hnsw::Candidate;

/// A node in the HNSW graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexNode {
    pub id: String,
    /// Highest layer this node appears on.
    pub level: usize,
    /// Neighbor ids per layer, `connections[layer]` for `layer in 0..=level`.
    pub connections: Vec<Vec<String>>,
    pub is_entry_point: bool,
}

impl IndexNode {
    pub fn new(id: impl Into<String>, level: usize) -> Self {
        Self {
            id: id.into(),
            level,
            connections: vec![Vec::new(); level + 1],
            is_entry_point: false,
        }
    }

    /// Neighbors on `layer`, empty if the node does not reach that layer.
    pub fn connections_at(&self, layer: usize) -> &[String] {
        self.connections.get(layer).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedVector {
    pub embedding: Vec<f32>,
    pub magnitude: f32,
}

/// In-memory HNSW graph over the vector store.
#[derive(Debug)]
pub struct HnswIndex {
    dimension: usize,
    config: IndexConfig,
    nodes: HashMap<String, IndexNode>,
    vectors: HashMap<String, CachedVector>,
    entry_point: Option<String>,
    dirty: HashSet<String>,
    removed: HashSet<String>,
}

impl HnswIndex {
    /// Create an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize, config: IndexConfig) -> Self {
        Self {
            dimension,
            config,
            nodes: HashMap::new(),
            vectors: HashMap::new(),
            entry_point: None,
            dirty: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&IndexNode> {
        self.nodes.get(id)
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    /// Highest layer in the graph, if it has any nodes.
    pub fn max_layer(&self) -> Option<usize> {
        self.entry_point
            .as_ref()
            .and_then(|id| self.nodes.get(id))
            .map(|node| node.level)
    }

    /// Cached embedding and magnitude for `id`.
    pub fn vector(&self, id: &str) -> Option<(&[f32], f32)> {
        self.vectors
            .get(id)
            .map(|v| (v.embedding.as_slice(), v.magnitude))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// True when node rows are waiting for [`HnswIndex::persist`].
    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }

    fn max_connections(&self, layer: usize) -> usize {
        let m = self.config.m.max(1);
        if layer == 0 {
            m * 2
        } else {
            m
        }
    }
}
