//! Loading the graph from, and writing dirty nodes to, SQLite.

use rusqlite::{params, Connection};

use super::{CachedVector, HnswIndex, IndexNode};
use crate::config::IndexConfig;
use crate::error::StoreResult;
use crate::memory::bytes_to_embedding;

impl HnswIndex {
    /// Load every vector and index node into memory.
    ///
    /// The loaded graph is normalized: node rows without a vector are skipped,
    /// dangling neighbor ids are dropped, vectors that have no node are inserted,
    /// and exactly one entry point is elected. Anything repaired is left dirty so
    /// the next [`HnswIndex::persist`] writes it back.
    pub fn load(conn: &Connection, dimension: usize, config: IndexConfig) -> StoreResult<Self> {
        let mut index = HnswIndex::new(dimension, config);

        let mut stmt = conn.prepare("SELECT id, dimension, embedding, magnitude FROM vectors")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        for row in rows {
            let (id, dim, bytes, magnitude) = row?;
            let embedding = bytes_to_embedding(&bytes);
            if dim as usize != dimension || embedding.len() != dimension {
                tracing::warn!(id = %id, dim, expected = dimension, "skipping vector with wrong dimension");
                continue;
            }
            index.vectors.insert(
                id,
                CachedVector {
                    embedding,
                    magnitude: magnitude as f32,
                },
            );
        }

        let mut stmt =
            conn.prepare("SELECT id, level, connections, is_entry_point FROM index_nodes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;
        for row in rows {
            let (id, level, connections, is_entry_point) = row?;
            if !index.vectors.contains_key(&id) {
                // Left for the orphan sweep to delete
                continue;
            }
            let level = (level.max(0) as usize).min(config.max_level);
            let mut connections: Vec<Vec<String>> = match serde_json::from_str(&connections) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "unreadable connections, resetting node");
                    index.dirty.insert(id.clone());
                    Vec::new()
                }
            };
            if connections.len() != level + 1 {
                connections.resize(level + 1, Vec::new());
                index.dirty.insert(id.clone());
            }
            index.nodes.insert(
                id.clone(),
                IndexNode {
                    id,
                    level,
                    connections,
                    is_entry_point,
                },
            );
        }

        index.drop_dangling_links();

        let flagged: Vec<String> = index
            .nodes
            .values()
            .filter(|n| n.is_entry_point)
            .map(|n| n.id.clone())
            .collect();
        match flagged.as_slice() {
            [only] => index.entry_point = Some(only.clone()),
            _ => index.elect_entry_point(),
        }

        let unindexed: Vec<(String, Vec<f32>)> = index
            .vectors
            .iter()
            .filter(|(id, _)| !index.nodes.contains_key(*id))
            .map(|(id, v)| (id.clone(), v.embedding.clone()))
            .collect();
        if !unindexed.is_empty() {
            tracing::warn!(count = unindexed.len(), "indexing vectors without graph nodes");
        }
        for (id, embedding) in unindexed {
            index.insert(&id, embedding)?;
        }

        tracing::debug!(
            nodes = index.nodes.len(),
            entry_point = ?index.entry_point,
            repaired = index.dirty.len(),
            "index loaded"
        );
        Ok(index)
    }

    /// Write dirty nodes and delete removed ones. Call inside the same
    /// transaction as the content and vector writes.
    pub fn persist(&mut self, conn: &Connection) -> StoreResult<()> {
        if !self.has_pending_changes() {
            return Ok(());
        }

        let mut delete = conn.prepare_cached("DELETE FROM index_nodes WHERE id = ?1")?;
        for id in self.removed.drain() {
            delete.execute(params![id])?;
        }

        let mut upsert = conn.prepare_cached(
            "INSERT INTO index_nodes (id, level, connections, is_entry_point)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                level = excluded.level,
                connections = excluded.connections,
                is_entry_point = excluded.is_entry_point",
        )?;
        for id in self.dirty.drain() {
            if let Some(node) = self.nodes.get(&id) {
                upsert.execute(params![
                    node.id,
                    node.level as i64,
                    serde_json::to_string(&node.connections)?,
                    node.is_entry_point,
                ])?;
            }
        }

        Ok(())
    }

    fn drop_dangling_links(&mut self) {
        let known: std::collections::HashSet<String> = self.nodes.keys().cloned().collect();
        for node in self.nodes.values_mut() {
            let mut changed = false;
            for list in node.connections.iter_mut() {
                let before = list.len();
                list.retain(|n| known.contains(n) && *n != node.id);
                changed |= list.len() != before;
            }
            if changed {
                self.dirty.insert(node.id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::memory::embedding_to_bytes;
    use crate::similarity::magnitude;

    fn write_vector(conn: &Connection, id: &str, v: &[f32]) {
        conn.execute(
            "INSERT INTO vectors (id, dimension, embedding, magnitude) VALUES (?1, ?2, ?3, ?4)",
            params![id, v.len() as i64, embedding_to_bytes(v), magnitude(v) as f64],
        )
        .unwrap();
    }

    #[test]
    fn persist_then_load_restores_graph() {
        let conn = open_in_memory().unwrap();
        let mut index = HnswIndex::new(3, IndexConfig::default());
        for (i, v) in [[1.0f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0, 0.0]]
            .iter()
            .enumerate()
        {
            let id = format!("v{i}");
            write_vector(&conn, &id, v);
            index.insert(&id, v.to_vec()).unwrap();
        }
        index.persist(&conn).unwrap();
        assert!(!index.has_pending_changes());

        let loaded = HnswIndex::load(&conn, 3, IndexConfig::default()).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.entry_point(), index.entry_point());
        for id in index.ids() {
            assert_eq!(loaded.node(id), index.node(id));
        }
        assert!(!loaded.has_pending_changes());
    }

    #[test]
    fn load_indexes_vectors_missing_nodes() {
        let conn = open_in_memory().unwrap();
        write_vector(&conn, "a", &[1.0, 0.0]);
        write_vector(&conn, "b", &[0.0, 1.0]);

        let loaded = HnswIndex::load(&conn, 2, IndexConfig::default()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.entry_point().is_some());
        assert!(loaded.has_pending_changes());
    }

    #[test]
    fn load_skips_nodes_without_vectors_and_drops_dangling_links() {
        let conn = open_in_memory().unwrap();
        write_vector(&conn, "a", &[1.0, 0.0]);
        conn.execute(
            "INSERT INTO index_nodes (id, level, connections, is_entry_point) VALUES
             ('a', 0, '[[\"ghost\"]]', 0),
             ('ghost', 2, '[[\"a\"],[],[]]', 1)",
            [],
        )
        .unwrap();

        let loaded = HnswIndex::load(&conn, 2, IndexConfig::default()).unwrap();
        assert!(!loaded.contains("ghost"));
        assert!(loaded.node("a").unwrap().connections_at(0).is_empty());
        assert_eq!(loaded.entry_point(), Some("a"));
    }
}
