use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::millis_to_datetime;
use super::search::MetricsSnapshot;
use super::types::SourceKind;
use crate::error::StoreResult;

/// Response from [`content_stats`].
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_content: u64,
    pub total_vectors: u64,
    pub index_nodes: u64,
    pub user_created: u64,
    pub by_tag: BTreeMap<String, u64>,
    pub by_source: BTreeMap<String, u64>,
    pub most_accessed: Vec<AccessEntry>,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<chrono::DateTime<chrono::Utc>>,
    /// Filled in by the engine, which owns the counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<MetricsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessEntry {
    pub id: String,
    pub access_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
}

/// Compute store statistics by full scan.
///
/// `db_path` is used for file size calculation; pass None for in-memory databases.
/// `top_n` bounds the most-accessed ranking.
pub fn content_stats(
    conn: &Connection,
    db_path: Option<&Path>,
    top_n: usize,
) -> StoreResult<StatsResponse> {
    let count = |sql: &str| -> rusqlite::Result<u64> {
        conn.query_row(sql, [], |row| row.get::<_, i64>(0)).map(|n| n as u64)
    };

    let (oldest, newest): (Option<i64>, Option<i64>) = conn.query_row(
        "SELECT MIN(timestamp_ms), MAX(timestamp_ms) FROM content",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_content: count("SELECT COUNT(*) FROM content")?,
        total_vectors: count("SELECT COUNT(*) FROM vectors")?,
        index_nodes: count("SELECT COUNT(*) FROM index_nodes")?,
        user_created: count("SELECT COUNT(*) FROM content WHERE user_created = 1")?,
        by_tag: count_by_tag(conn)?,
        by_source: count_by_source(conn)?,
        most_accessed: most_accessed(conn, top_n)?,
        db_size_bytes,
        oldest: oldest.map(millis_to_datetime),
        newest: newest.map(millis_to_datetime),
        search: None,
    })
}

/// Tag frequency histogram.
fn count_by_tag(conn: &Connection) -> rusqlite::Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare("SELECT tag, COUNT(*) FROM content_tags GROUP BY tag")?;
    let map = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(map)
}

/// Source frequency histogram. Every kind is present, zero if unused.
fn count_by_source(conn: &Connection) -> rusqlite::Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = SourceKind::ALL
        .iter()
        .map(|k| (k.as_str().to_string(), 0))
        .collect();

    let mut stmt = conn.prepare("SELECT source_kind, COUNT(*) FROM content GROUP BY source_kind")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    for (kind, count) in rows {
        map.insert(kind, count as u64);
    }
    Ok(map)
}

/// Records read at least once, most accessed first.
fn most_accessed(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<AccessEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, access_count, last_accessed FROM content \
         WHERE access_count > 0 \
         ORDER BY access_count DESC, last_accessed DESC, id ASC LIMIT ?1",
    )?;
    let entries = stmt
        .query_map([limit as i64], |row| {
            Ok(AccessEntry {
                id: row.get(0)?,
                access_count: row.get(1)?,
                last_accessed: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::db::open_in_memory;
    use crate::index::HnswIndex;
    use crate::memory::search::record_access;
    use crate::memory::store::store_content;
    use crate::memory::types::{Source, StoreRequest};

    #[test]
    fn test_empty_db_stats() {
        let conn = open_in_memory().unwrap();
        let stats = content_stats(&conn, None, 5).unwrap();
        assert_eq!(stats.total_content, 0);
        assert_eq!(stats.by_source.len(), SourceKind::ALL.len());
        assert!(stats.by_source.values().all(|&n| n == 0));
        assert!(stats.by_tag.is_empty());
        assert!(stats.oldest.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_histograms_and_ranking() {
        let mut conn = open_in_memory().unwrap();
        let mut index = HnswIndex::new(2, IndexConfig::default());
        let items = [
            ("a", Source::Clipboard, vec!["commitment"]),
            ("b", Source::Manual, vec!["commitment", "urgent_action"]),
            ("c", Source::Browser { url: "https://example.com".into(), title: None }, vec![]),
        ];
        for (i, (id, source, tags)) in items.into_iter().enumerate() {
            let request = StoreRequest::new(id, vec![1.0, i as f32], source)
                .with_id(id)
                .with_tags(tags);
            store_content(&mut conn, &mut index, &request).unwrap();
        }
        record_access(&conn, &["c", "c", "a"]).unwrap();

        let stats = content_stats(&conn, None, 1).unwrap();
        assert_eq!(stats.total_content, 3);
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.index_nodes, 3);
        assert_eq!(stats.user_created, 1);
        assert_eq!(stats.by_tag["commitment"], 2);
        assert_eq!(stats.by_tag["urgent_action"], 1);
        assert_eq!(stats.by_source["browser"], 1);
        assert_eq!(stats.by_source["email"], 0);
        assert_eq!(stats.most_accessed.len(), 1);
        assert_eq!(stats.most_accessed[0].id, "c");
        assert_eq!(stats.most_accessed[0].access_count, 2);
        assert!(stats.oldest <= stats.newest);
    }
}
