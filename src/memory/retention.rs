//! Capacity eviction, time-based retention and orphan repair.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

use super::store::delete_rows;
use super::{millis_to_datetime, transact, truncate_preview};
use crate::error::StoreResult;
use crate::index::HnswIndex;

/// Longer windows are clamped; chrono cannot represent the cutoff otherwise.
const MAX_RETENTION_DAYS: i64 = 1_000_000;

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
pub struct EvictionResult {
    pub capacity: usize,
    pub evicted: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SweepCandidate {
    pub id: String,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SweepResult {
    pub cutoff: DateTime<Utc>,
    pub candidates: Vec<SweepCandidate>,
    pub deleted: usize,
    pub dry_run: bool,
    /// Orphans repaired after the deletion. Empty on a dry run.
    pub orphans: OrphanReport,
}

#[derive(Debug, Default, Serialize)]
pub struct OrphanReport {
    pub vectors_removed: usize,
    pub nodes_removed: usize,
    pub tags_removed: usize,
    /// Content rows with no vector. Reported, not deleted.
    pub content_without_vectors: Vec<String>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.vectors_removed == 0
            && self.nodes_removed == 0
            && self.tags_removed == 0
            && self.content_without_vectors.is_empty()
    }
}

// ── Capacity ─────────────────────────────────────────────────────────────────

/// Evict until at most `capacity` indexed records remain.
///
/// Victims are the least accessed, oldest first (`access_count ASC,
/// timestamp ASC`). All of them go in one transaction. A capacity of `0`
/// disables the cap.
pub fn enforce_capacity(
    conn: &mut Connection,
    index: &mut HnswIndex,
    capacity: usize,
) -> StoreResult<EvictionResult> {
    if capacity == 0 {
        return Ok(EvictionResult::default());
    }

    let live: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vectors v JOIN content c ON c.id = v.id",
        [],
        |row| row.get(0),
    )?;
    let excess = (live.max(0) as usize).saturating_sub(capacity);
    if excess == 0 {
        return Ok(EvictionResult {
            capacity,
            evicted: Vec::new(),
        });
    }

    let victims: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT c.id FROM content c JOIN vectors v ON v.id = c.id \
             ORDER BY c.access_count ASC, c.timestamp_ms ASC, c.id ASC \
             LIMIT ?1",
        )?;
        let collected = stmt
            .query_map(params![excess as i64], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        collected
    };

    transact(conn, index, |tx, index| {
        delete_all(tx, index, &victims)?;
        Ok(())
    })?;

    tracing::info!(evicted = victims.len(), capacity, "capacity eviction");
    Ok(EvictionResult {
        capacity,
        evicted: victims,
    })
}

// ── Retention ────────────────────────────────────────────────────────────────

/// Delete content older than `retention_days` before `now`, except records
/// flagged `user_created`, then run the orphan sweep.
///
/// In dry-run mode, returns the candidates without deleting anything.
pub fn retention_sweep(
    conn: &mut Connection,
    index: &mut HnswIndex,
    retention_days: u64,
    now: DateTime<Utc>,
    dry_run: bool,
) -> StoreResult<SweepResult> {
    let days = i64::try_from(retention_days).unwrap_or(i64::MAX).min(MAX_RETENTION_DAYS);
    let cutoff = now - Duration::days(days);

    let candidates: Vec<SweepCandidate> = {
        let mut stmt = conn.prepare(
            "SELECT id, text, timestamp_ms FROM content \
             WHERE timestamp_ms < ?1 AND user_created = 0 \
             ORDER BY timestamp_ms ASC, id ASC",
        )?;
        let collected = stmt
            .query_map(params![cutoff.timestamp_millis()], |row| {
                let text: String = row.get(1)?;
                Ok(SweepCandidate {
                    id: row.get(0)?,
                    preview: truncate_preview(&text, 80),
                    timestamp: millis_to_datetime(row.get(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        collected
    };

    if dry_run {
        return Ok(SweepResult {
            cutoff,
            candidates,
            deleted: 0,
            dry_run: true,
            orphans: OrphanReport::default(),
        });
    }

    let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
    if !ids.is_empty() {
        transact(conn, index, |tx, index| {
            delete_all(tx, index, &ids)?;
            Ok(())
        })?;
    }
    let orphans = orphan_sweep(conn, index)?;

    tracing::info!(
        deleted = ids.len(),
        retention_days,
        cutoff = %cutoff,
        "retention sweep"
    );
    Ok(SweepResult {
        cutoff,
        deleted: ids.len(),
        candidates,
        dry_run: false,
        orphans,
    })
}

/// Delete vector rows, tag rows and index nodes that have no content row, and
/// report content that has no vector.
///
/// Runs at every open; also persists any graph repairs made while loading.
pub fn orphan_sweep(conn: &mut Connection, index: &mut HnswIndex) -> StoreResult<OrphanReport> {
    let report = transact(conn, index, |tx, index| {
        let orphan_vectors = collect_ids(
            tx,
            "SELECT v.id FROM vectors v WHERE NOT EXISTS (SELECT 1 FROM content c WHERE c.id = v.id)",
        )?;
        let orphan_nodes = collect_ids(
            tx,
            "SELECT n.id FROM index_nodes n \
             WHERE NOT EXISTS (SELECT 1 FROM content c WHERE c.id = n.id) \
                OR NOT EXISTS (SELECT 1 FROM vectors v WHERE v.id = n.id)",
        )?;

        let mut vectors_removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM vectors WHERE id = ?1")?;
            for id in &orphan_vectors {
                vectors_removed += stmt.execute(params![id])?;
            }
        }
        let tags_removed = tx.execute(
            "DELETE FROM content_tags WHERE content_id NOT IN (SELECT id FROM content)",
            [],
        )?;

        // Node rows are deleted by persist at commit
        index.remove_many(
            orphan_vectors
                .iter()
                .chain(orphan_nodes.iter())
                .map(String::as_str),
        );

        let content_without_vectors = collect_ids(
            tx,
            "SELECT c.id FROM content c WHERE NOT EXISTS (SELECT 1 FROM vectors v WHERE v.id = c.id)",
        )?;

        Ok(OrphanReport {
            vectors_removed,
            nodes_removed: orphan_nodes.len(),
            tags_removed,
            content_without_vectors,
        })
    })?;

    if report.is_clean() {
        tracing::debug!("orphan sweep found nothing");
    } else {
        tracing::warn!(
            vectors = report.vectors_removed,
            nodes = report.nodes_removed,
            tags = report.tags_removed,
            unindexed_content = report.content_without_vectors.len(),
            "orphan sweep repaired inconsistencies"
        );
    }
    Ok(report)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn delete_all(tx: &Transaction<'_>, index: &mut HnswIndex, ids: &[String]) -> StoreResult<()> {
    for id in ids {
        delete_rows(tx, id)?;
    }
    index.remove_many(ids.iter().map(String::as_str));
    Ok(())
}

fn collect_ids(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::db::open_in_memory;
    use crate::memory::store::{fetch, store_content};
    use crate::memory::types::{Source, StoreRequest};

    fn setup() -> (Connection, HnswIndex) {
        (open_in_memory().unwrap(), HnswIndex::new(2, IndexConfig::default()))
    }

    fn put(conn: &mut Connection, index: &mut HnswIndex, id: &str, age_days: i64, source: Source) {
        let request = StoreRequest::new(format!("note {id}"), vec![1.0, id.len() as f32], source)
            .with_id(id)
            .with_timestamp(Utc::now() - Duration::days(age_days));
        store_content(conn, index, &request).unwrap();
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn capacity_evicts_least_accessed_then_oldest() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "a", 4, Source::Clipboard);
        put(&mut conn, &mut index, "b", 3, Source::Clipboard);
        put(&mut conn, &mut index, "c", 2, Source::Clipboard);
        put(&mut conn, &mut index, "d", 1, Source::Clipboard);
        conn.execute("UPDATE content SET access_count = 2 WHERE id = 'a'", [])
            .unwrap();

        let result = enforce_capacity(&mut conn, &mut index, 2).unwrap();
        assert_eq!(result.evicted, ["b", "c"]);
        assert_eq!(count(&conn, "vectors"), 2);
        assert_eq!(count(&conn, "index_nodes"), 2);
        assert_eq!(index.len(), 2);
        assert!(fetch(&conn, "a").unwrap().is_some());

        let noop = enforce_capacity(&mut conn, &mut index, 2).unwrap();
        assert!(noop.evicted.is_empty());
        assert!(enforce_capacity(&mut conn, &mut index, 0).unwrap().evicted.is_empty());
    }

    #[test]
    fn retention_spares_user_created_and_recent() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "old", 10, Source::Clipboard);
        put(&mut conn, &mut index, "mine", 10, Source::Manual);
        put(&mut conn, &mut index, "fresh", 0, Source::Clipboard);

        let preview = retention_sweep(&mut conn, &mut index, 1, Utc::now(), true).unwrap();
        assert_eq!(preview.candidates.len(), 1);
        assert_eq!(preview.deleted, 0);
        assert_eq!(count(&conn, "content"), 3);

        let result = retention_sweep(&mut conn, &mut index, 1, Utc::now(), false).unwrap();
        assert_eq!(result.deleted, 1);
        assert_eq!(result.candidates[0].id, "old");
        assert!(fetch(&conn, "old").unwrap().is_none());
        assert!(fetch(&conn, "mine").unwrap().is_some());
        assert!(!index.contains("old"));
        assert!(result.orphans.is_clean());
    }

    #[test]
    fn orphan_sweep_repairs_both_directions() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "ok", 0, Source::Clipboard);
        put(&mut conn, &mut index, "ghost", 0, Source::Clipboard);
        put(&mut conn, &mut index, "bare", 0, Source::Clipboard);

        // Simulate a torn write from an older layout
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             DELETE FROM content WHERE id = 'ghost';
             DELETE FROM vectors WHERE id = 'bare';
             INSERT INTO index_nodes (id, level, connections, is_entry_point)
                 VALUES ('stray', 0, '[[]]', 0);
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();

        let report = orphan_sweep(&mut conn, &mut index).unwrap();
        assert_eq!(report.vectors_removed, 1);
        assert_eq!(report.nodes_removed, 3);
        assert_eq!(report.tags_removed, 0);
        assert_eq!(report.content_without_vectors, ["bare"]);
        assert!(!index.contains("ghost"));
        assert!(index.contains("ok"));

        let dangling: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM index_nodes n WHERE NOT EXISTS (SELECT 1 FROM content c WHERE c.id = n.id)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(dangling, 0);
    }
}
