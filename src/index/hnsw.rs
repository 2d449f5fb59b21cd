//! Graph construction and traversal.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::seq::IteratorRandom;
use rand::Rng;

use super::{CachedVector, HnswIndex, IndexNode};
use crate::error::{StoreError, StoreResult};
use crate::similarity::{cosine_distance_with_magnitudes, magnitude};

/// A node id paired with its cosine distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub distance: f32,
    pub id: String,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl HnswIndex {
    /// Insert (or replace) `id` with its embedding.
    pub fn insert(&mut self, id: &str, embedding: Vec<f32>) -> StoreResult<()> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if self.nodes.contains_key(id) {
            self.remove(id);
        }

        let query_mag = magnitude(&embedding);
        let query = embedding.clone();
        let level = self.draw_level();

        self.vectors.insert(
            id.to_string(),
            CachedVector {
                embedding,
                magnitude: query_mag,
            },
        );
        self.removed.remove(id);
        self.dirty.insert(id.to_string());

        let Some(entry) = self.entry_point.clone() else {
            let mut node = IndexNode::new(id, level);
            node.is_entry_point = true;
            self.nodes.insert(id.to_string(), node);
            self.entry_point = Some(id.to_string());
            return Ok(());
        };
        let top = self.nodes.get(&entry).map(|n| n.level).unwrap_or(0);

        // Greedy descent through the layers above the new node
        let mut entry_points = vec![entry.clone()];
        for layer in (level + 1..=top).rev() {
            if let Some(best) = self
                .search_layer(&query, query_mag, &entry_points, 1, layer)
                .into_iter()
                .next()
            {
                entry_points = vec![best.id];
            }
        }

        self.nodes.insert(id.to_string(), IndexNode::new(id, level));

        for layer in (0..=level.min(top)).rev() {
            let found = self.search_layer(
                &query,
                query_mag,
                &entry_points,
                self.config.ef_construction.max(1),
                layer,
            );
            let neighbors: Vec<String> = found
                .iter()
                .filter(|c| c.id != id)
                .take(self.max_connections(layer))
                .map(|c| c.id.clone())
                .collect();

            if let Some(node) = self.nodes.get_mut(id) {
                node.connections[layer] = neighbors.clone();
            }
            for neighbor in &neighbors {
                self.link(neighbor, id, layer);
            }
            if !found.is_empty() {
                entry_points = found.into_iter().map(|c| c.id).collect();
            }
        }

        if level > top {
            if let Some(old) = self.nodes.get_mut(&entry) {
                old.is_entry_point = false;
                self.dirty.insert(entry);
            }
            if let Some(node) = self.nodes.get_mut(id) {
                node.is_entry_point = true;
            }
            self.entry_point = Some(id.to_string());
        }

        Ok(())
    }

    /// Remove `id` from the graph. Returns whether a node was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.remove_many([id]) > 0
    }

    /// Remove every id in `ids`, repairing neighbor lists in a single pass over
    /// the graph. Returns the number of nodes that were present.
    ///
    /// Ids without an in-memory node are still scheduled for deletion from the
    /// `index_nodes` table.
    pub fn remove_many<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut gone: HashMap<String, IndexNode> = HashMap::new();
        for id in ids {
            self.vectors.remove(id);
            self.dirty.remove(id);
            self.removed.insert(id.to_string());
            if let Some(node) = self.nodes.remove(id) {
                gone.insert(id.to_string(), node);
            }
        }
        if gone.is_empty() {
            return 0;
        }

        // Strip references and collect the nodes that lost a neighbor
        let mut wounded: Vec<(String, usize, Vec<String>)> = Vec::new();
        for node in self.nodes.values_mut() {
            for (layer, list) in node.connections.iter_mut().enumerate() {
                let before = list.len();
                let mut lost = Vec::new();
                list.retain(|n| match gone.get(n) {
                    Some(removed) => {
                        lost.extend(removed.connections_at(layer).iter().cloned());
                        false
                    }
                    None => true,
                });
                if list.len() != before {
                    wounded.push((node.id.clone(), layer, lost));
                }
            }
        }

        // Reconnect through the removed nodes' own neighbors
        for (id, layer, replacements) in wounded {
            for candidate in replacements {
                if candidate != id && !gone.contains_key(&candidate) {
                    self.link(&id, &candidate, layer);
                }
            }
            self.dirty.insert(id);
        }

        if self
            .entry_point
            .as_ref()
            .is_some_and(|ep| gone.contains_key(ep))
        {
            self.elect_entry_point();
        }

        gone.len()
    }

    /// Approximate `k` nearest neighbors of `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<Vec<Candidate>> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.nodes.is_empty() {
            return Ok(Vec::new());
        }

        let entry = match self
            .entry_point
            .as_ref()
            .filter(|ep| self.nodes.contains_key(*ep))
        {
            Some(ep) => ep.clone(),
            None => match self.nodes.keys().choose(&mut rand::thread_rng()) {
                Some(id) => id.clone(),
                None => return Ok(Vec::new()),
            },
        };

        let query_mag = magnitude(query);
        let top = self.nodes.get(&entry).map(|n| n.level).unwrap_or(0);
        let mut entry_points = vec![entry];
        for layer in (1..=top).rev() {
            if let Some(best) = self
                .search_layer(query, query_mag, &entry_points, 1, layer)
                .into_iter()
                .next()
            {
                entry_points = vec![best.id];
            }
        }

        let ef = k.min(self.nodes.len()).max(self.config.ef_search);
        let mut found = self.search_layer(query, query_mag, &entry_points, ef, 0);
        found.truncate(k);
        Ok(found)
    }

    /// Best-first search on one layer keeping the `ef` closest nodes seen.
    /// Returns them sorted closest first.
    fn search_layer(
        &self,
        query: &[f32],
        query_mag: f32,
        entry_points: &[String],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for ep in entry_points {
            if !visited.insert(ep.as_str()) {
                continue;
            }
            if let Some(distance) = self.distance_to(query, query_mag, ep) {
                let candidate = Candidate {
                    distance,
                    id: ep.clone(),
                };
                frontier.push(Reverse(candidate.clone()));
                results.push(candidate);
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && results.len() >= ef {
                break;
            }
            let Some(node) = self.nodes.get(&current.id) else {
                continue;
            };

            for neighbor in node.connections_at(layer) {
                if !visited.insert(neighbor.as_str()) {
                    continue;
                }
                let Some(distance) = self.distance_to(query, query_mag, neighbor) else {
                    continue;
                };
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if results.len() < ef || distance < worst {
                    let candidate = Candidate {
                        distance,
                        id: neighbor.clone(),
                    };
                    frontier.push(Reverse(candidate.clone()));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    fn distance_to(&self, query: &[f32], query_mag: f32, id: &str) -> Option<f32> {
        self.vectors
            .get(id)
            .map(|v| cosine_distance_with_magnitudes(query, query_mag, &v.embedding, v.magnitude))
    }

    /// Add `to` to `from`'s neighbors on `layer`, pruning to the closest
    /// `max_connections` when the list overflows.
    fn link(&mut self, from: &str, to: &str, layer: usize) {
        let max_conn = self.max_connections(layer);
        let Some(node) = self.nodes.get_mut(from) else {
            return;
        };
        let Some(list) = node.connections.get_mut(layer) else {
            return;
        };
        if list.iter().any(|n| n == to) {
            return;
        }
        list.push(to.to_string());

        if list.len() > max_conn {
            match self.vectors.get(from) {
                Some(base) => {
                    let mut scored: Vec<Candidate> = list
                        .iter()
                        .filter_map(|n| {
                            self.vectors.get(n).map(|v| Candidate {
                                distance: cosine_distance_with_magnitudes(
                                    &base.embedding,
                                    base.magnitude,
                                    &v.embedding,
                                    v.magnitude,
                                ),
                                id: n.clone(),
                            })
                        })
                        .collect();
                    scored.sort();
                    *list = scored.into_iter().take(max_conn).map(|c| c.id).collect();
                }
                None => list.truncate(max_conn),
            }
        }
        self.dirty.insert(from.to_string());
    }

    /// Flag the highest-level node (smallest id on ties) as the entry point.
    pub(super) fn elect_entry_point(&mut self) {
        let elected = self
            .nodes
            .values()
            .max_by(|a, b| a.level.cmp(&b.level).then_with(|| b.id.cmp(&a.id)))
            .map(|n| n.id.clone());

        for node in self.nodes.values_mut() {
            let flag = elected.as_deref() == Some(node.id.as_str());
            if node.is_entry_point != flag {
                node.is_entry_point = flag;
                self.dirty.insert(node.id.clone());
            }
        }
        self.entry_point = elected;
    }

    /// Fair coin flips until the first tails, capped at `max_level`.
    fn draw_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while level < self.config.max_level && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }
}
