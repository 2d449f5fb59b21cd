//! Read path: ANN candidates, exact re-rank, keyword match and RRF fusion.
//!
//! Vector queries run in two phases so the engine can release the index lock
//! before touching SQLite: [`ann_candidates`] walks the graph and scores each
//! candidate exactly with cached magnitudes, then the `finish_*` functions
//! hydrate rows, filter, order and bump access bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use super::filter::SearchFilter;
use super::{now_rfc3339, sql_limit};
use super::store::{hydrate, record_from_row, RECORD_SELECT};
use super::types::RankedResult;
use crate::error::{StoreError, StoreResult};
use crate::index::HnswIndex;
use crate::similarity::{cosine_similarity_with_magnitudes, magnitude, to_score};

/// Queries beyond this many whitespace-separated terms are truncated.
const MAX_KEYWORD_TERMS: usize = 16;

// ── Public types ──────────────────────────────────────────────────────────────

/// An ANN candidate with its exact cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub id: String,
    pub similarity: f32,
}

/// Wall-clock latency of vector-backed searches.
#[derive(Debug, Default)]
pub struct SearchMetrics {
    searches: AtomicU64,
    total_us: AtomicU64,
    last_us: AtomicU64,
    max_us: AtomicU64,
}

/// Point-in-time copy of [`SearchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub searches: u64,
    pub last_latency_us: u64,
    pub mean_latency_us: u64,
    pub max_latency_us: u64,
}

impl SearchMetrics {
    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.last_us.store(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let searches = self.searches.load(Ordering::Relaxed);
        let total = self.total_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            searches,
            last_latency_us: self.last_us.load(Ordering::Relaxed),
            mean_latency_us: if searches == 0 { 0 } else { total / searches },
            max_latency_us: self.max_us.load(Ordering::Relaxed),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Top-`k` records by cosine similarity at or above `threshold`.
///
/// Takes `2k` ANN candidates, re-ranks them exactly, orders by score with ties
/// going to the newer record, and bumps access counts on what it returns.
pub fn similarity_search(
    conn: &Connection,
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    threshold: f32,
) -> StoreResult<Vec<RankedResult>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let candidates = ann_candidates(index, query, k.saturating_mul(2)).map_err(StoreError::into_search)?;
    finish_similarity(conn, candidates, k, threshold)
}

/// Second phase of [`similarity_search`].
pub fn finish_similarity(
    conn: &Connection,
    candidates: Vec<ScoredCandidate>,
    k: usize,
    threshold: f32,
) -> StoreResult<Vec<RankedResult>> {
    let results = rank_candidates(conn, candidates, k, threshold, None)?;
    record_access(conn, &result_ids(&results))?;
    Ok(results)
}

/// Walk the graph for `n` approximate neighbors and score each exactly.
pub fn ann_candidates(
    index: &HnswIndex,
    query: &[f32],
    n: usize,
) -> StoreResult<Vec<ScoredCandidate>> {
    if query.len() != index.dimension() {
        return Err(StoreError::DimensionMismatch {
            expected: index.dimension(),
            actual: query.len(),
        });
    }
    if query.iter().any(|x| !x.is_finite()) {
        return Err(StoreError::InvalidInput(
            "query embedding contains non-finite components".into(),
        ));
    }

    let query_mag = magnitude(query);
    let found = index.search(query, n)?;
    Ok(found
        .into_iter()
        .filter_map(|c| {
            let (embedding, mag) = index.vector(&c.id)?;
            Some(ScoredCandidate {
                similarity: cosine_similarity_with_magnitudes(query, query_mag, embedding, mag),
                id: c.id,
            })
        })
        .collect())
}

/// Hydrate candidates, drop those under `threshold` or rejected by `filter`,
/// and return the top `k`. Does not touch access bookkeeping.
pub fn rank_candidates(
    conn: &Connection,
    candidates: Vec<ScoredCandidate>,
    k: usize,
    threshold: f32,
    filter: Option<&SearchFilter>,
) -> StoreResult<Vec<RankedResult>> {
    let passing: Vec<ScoredCandidate> = candidates
        .into_iter()
        .filter(|c| c.similarity >= threshold)
        .collect();
    if passing.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let ids: Vec<&str> = passing.iter().map(|c| c.id.as_str()).collect();
    let mut records = hydrate(conn, &ids).map_err(StoreError::into_search)?;

    // Candidates without a content row are orphans awaiting the sweep
    let mut ranked: Vec<RankedResult> = passing
        .iter()
        .filter_map(|c| {
            let record = records.remove(&c.id)?;
            filter
                .map_or(true, |f| f.matches(&record))
                .then(|| RankedResult::from_record(record, to_score(c.similarity)))
        })
        .collect();

    sort_ranked(&mut ranked);
    ranked.truncate(k);
    Ok(ranked)
}

/// Case-insensitive substring match over stored text, newest first.
///
/// Every whitespace-separated term must occur. Scores are the sentinel `1.0`.
/// A placeholder for a real full-text index.
pub fn keyword_search(conn: &Connection, query: &str, k: usize) -> StoreResult<Vec<RankedResult>> {
    let terms: Vec<String> = query
        .split_whitespace()
        .take(MAX_KEYWORD_TERMS)
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let clauses: Vec<String> = (1..=terms.len())
        .map(|i| format!("instr(lower(c.text), ?{i}) > 0"))
        .collect();
    let sql = format!(
        "{RECORD_SELECT} WHERE {} ORDER BY c.timestamp_ms DESC, c.id DESC LIMIT {}",
        clauses.join(" AND "),
        sql_limit(k)
    );

    let run = || -> rusqlite::Result<Vec<RankedResult>> {
        let mut stmt = conn.prepare(&sql)?;
        let results = stmt
            .query_map(params_from_iter(terms.iter()), record_from_row)?
            .map(|r| r.map(|record| RankedResult::from_record(record, 1.0)))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    };
    run().map_err(|e| StoreError::SearchFailed(e.to_string()))
}

/// Keyword and vector search fused with reciprocal rank fusion.
///
/// Each side requests `2k`. When `query_embedding` is `None` (the provider
/// declined) only the keyword list contributes.
pub fn hybrid_search(
    conn: &Connection,
    index: &HnswIndex,
    query: &str,
    query_embedding: Option<&[f32]>,
    k: usize,
    threshold: f32,
    rrf_k: usize,
) -> StoreResult<Vec<RankedResult>> {
    let candidates = query_embedding
        .map(|q| ann_candidates(index, q, k.saturating_mul(4)))
        .transpose()
        .map_err(StoreError::into_search)?;
    finish_hybrid(conn, query, candidates, k, threshold, rrf_k)
}

/// Second phase of [`hybrid_search`].
pub fn finish_hybrid(
    conn: &Connection,
    query: &str,
    candidates: Option<Vec<ScoredCandidate>>,
    k: usize,
    threshold: f32,
    rrf_k: usize,
) -> StoreResult<Vec<RankedResult>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let keyword = keyword_search(conn, query, k.saturating_mul(2))?;
    let vector = match candidates {
        Some(c) => rank_candidates(conn, c, k.saturating_mul(2), threshold, None)?,
        None => Vec::new(),
    };

    let fused = fuse(vec![keyword, vector], k, rrf_k);
    record_access(conn, &result_ids(&fused))?;
    Ok(fused)
}

/// Merge ranked id lists: the item at 0-based rank `r` of any list contributes
/// `1 / (rrf_k + r)`, with `rrf_k` at least 1. Sorted by fused score
/// descending, then id.
pub fn rrf_merge(lists: &[Vec<String>], rrf_k: usize) -> Vec<(String, f64)> {
    let rrf_k = rrf_k.max(1) as f64;
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.as_str()).or_insert(0.0) += 1.0 / (rrf_k + rank as f64);
        }
    }

    let mut merged: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    merged.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    merged
}

/// Bump `access_count` and `last_accessed` for every id.
pub fn record_access(conn: &Connection, ids: &[&str]) -> StoreResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let now = now_rfc3339();
    let mut stmt = conn.prepare_cached(
        "UPDATE content SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
    )?;
    for id in ids {
        stmt.execute(params![now, id])?;
    }
    Ok(())
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Score descending, then newer first, then id for a stable order.
pub(crate) fn sort_ranked(results: &mut [RankedResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn result_ids(results: &[RankedResult]) -> Vec<&str> {
    results.iter().map(|r| r.id.as_str()).collect()
}

/// RRF over already-hydrated lists; the fused score replaces each item's score.
fn fuse(lists: Vec<Vec<RankedResult>>, k: usize, rrf_k: usize) -> Vec<RankedResult> {
    let id_lists: Vec<Vec<String>> = lists
        .iter()
        .map(|l| l.iter().map(|r| r.id.clone()).collect())
        .collect();

    let mut by_id: HashMap<String, RankedResult> = HashMap::new();
    for result in lists.into_iter().flatten() {
        by_id.entry(result.id.clone()).or_insert(result);
    }

    let mut fused: Vec<RankedResult> = rrf_merge(&id_lists, rrf_k)
        .into_iter()
        .filter_map(|(id, score)| {
            by_id.remove(&id).map(|mut r| {
                r.score = score;
                r
            })
        })
        .collect();
    sort_ranked(&mut fused);
    fused.truncate(k);
    fused
}

/// Run one search, recording its latency.
pub(crate) fn timed<T>(metrics: &SearchMetrics, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    let elapsed = started.elapsed();
    metrics.record(elapsed);
    tracing::debug!(latency_us = elapsed.as_micros() as u64, "search");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::db::open_in_memory;
    use crate::memory::store::store_content;
    use crate::memory::types::{Source, StoreRequest};
    use chrono::{Duration as ChronoDuration, Utc};

    fn setup() -> (Connection, HnswIndex) {
        (open_in_memory().unwrap(), HnswIndex::new(4, IndexConfig::default()))
    }

    fn put(conn: &mut Connection, index: &mut HnswIndex, id: &str, text: &str, v: [f32; 4], age_h: i64) {
        let request = StoreRequest::new(text, v.to_vec(), Source::Clipboard)
            .with_id(id)
            .with_timestamp(Utc::now() - ChronoDuration::hours(age_h));
        store_content(conn, index, &request).unwrap();
    }

    fn access_count(conn: &Connection, id: &str) -> u32 {
        conn.query_row("SELECT access_count FROM content WHERE id = ?1", [id], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn similarity_search_ranks_by_cosine_and_applies_threshold() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "near", "a", [1.0, 0.1, 0.0, 0.0], 1);
        put(&mut conn, &mut index, "mid", "b", [1.0, 1.0, 0.0, 0.0], 1);
        put(&mut conn, &mut index, "far", "c", [0.0, 0.0, 1.0, 0.0], 1);

        let results = similarity_search(&conn, &index, &[1.0, 0.0, 0.0, 0.0], 3, 0.5).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["near", "mid"]);
        assert!(results[0].score > results[1].score);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));

        assert_eq!(access_count(&conn, "near"), 1);
        assert_eq!(access_count(&conn, "far"), 0);
    }

    #[test]
    fn similarity_ties_go_to_newer_records() {
        let (mut conn, mut index) = setup();
        for (id, age) in [("t0", 3), ("t1", 2), ("t2", 1)] {
            put(&mut conn, &mut index, id, "urgent email reply", [0.5, 0.5, 0.5, 0.5], age);
        }
        let results = similarity_search(&conn, &index, &[0.5, 0.5, 0.5, 0.5], 3, 0.6).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["t2", "t1", "t0"]);
    }

    #[test]
    fn similarity_rejects_wrong_dimension() {
        let (conn, index) = setup();
        let err = similarity_search(&conn, &index, &[1.0, 0.0], 3, 0.0).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn keyword_search_matches_all_terms_case_insensitively() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "old", "Reply to the URGENT email", [1.0, 0.0, 0.0, 0.0], 5);
        put(&mut conn, &mut index, "new", "urgent: email from Sam", [0.0, 1.0, 0.0, 0.0], 1);
        put(&mut conn, &mut index, "other", "urgent call", [0.0, 0.0, 1.0, 0.0], 0);

        let results = keyword_search(&conn, "urgent Email", 10).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
        assert!(results.iter().all(|r| r.score == 1.0));

        assert!(keyword_search(&conn, "   ", 10).unwrap().is_empty());
        assert_eq!(keyword_search(&conn, "urgent", 1).unwrap().len(), 1);
    }

    #[test]
    fn keyword_search_treats_sql_wildcards_literally() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "pct", "50% off", [1.0, 0.0, 0.0, 0.0], 1);
        put(&mut conn, &mut index, "plain", "fifty off", [0.0, 1.0, 0.0, 0.0], 1);
        let results = keyword_search(&conn, "%", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "pct");
    }

    #[test]
    fn rrf_merge_rewards_agreement() {
        let lists = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["b".to_string(), "c".to_string()],
        ];
        let merged = rrf_merge(&lists, 60);
        assert_eq!(merged[0].0, "b");
        let b = 1.0 / 61.0 + 1.0 / 60.0;
        assert!((merged[0].1 - b).abs() < 1e-12);
        assert_eq!(merged[1].0, "a");
        assert_eq!(merged[2].0, "c");
    }

    #[test]
    fn rrf_merge_with_zero_constant_stays_finite() {
        let lists = vec![vec!["a".to_string()]];
        let merged = rrf_merge(&lists, 0);
        assert!(merged[0].1.is_finite());
        assert!((merged[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn hybrid_ranks_items_found_by_both_sides_first() {
        let (mut conn, mut index) = setup();
        // "both" matches the keyword and sits next to the query vector
        put(&mut conn, &mut index, "both", "quarterly budget review", [1.0, 0.05, 0.0, 0.0], 3);
        put(&mut conn, &mut index, "kw_only", "budget spreadsheet", [0.0, 0.0, 0.0, 1.0], 0);
        put(&mut conn, &mut index, "vec_only", "finance sync", [1.0, 0.1, 0.0, 0.0], 2);

        let results = hybrid_search(
            &conn,
            &index,
            "budget",
            Some(&[1.0, 0.0, 0.0, 0.0]),
            3,
            0.5,
            60,
        )
        .unwrap();
        assert_eq!(results[0].id, "both");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn hybrid_without_embedding_is_keyword_only() {
        let (mut conn, mut index) = setup();
        put(&mut conn, &mut index, "a", "standup notes", [1.0, 0.0, 0.0, 0.0], 2);
        put(&mut conn, &mut index, "b", "standup agenda", [0.0, 1.0, 0.0, 0.0], 1);
        let results = hybrid_search(&conn, &index, "standup", None, 5, 0.5, 60).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(access_count(&conn, "a"), 1);
    }

    #[test]
    fn metrics_track_count_and_max() {
        let metrics = SearchMetrics::default();
        metrics.record(Duration::from_micros(40));
        metrics.record(Duration::from_micros(10));
        let snap = metrics.snapshot();
        assert_eq!(snap.searches, 2);
        assert_eq!(snap.last_latency_us, 10);
        assert_eq!(snap.max_latency_us, 40);
        assert_eq!(snap.mean_latency_us, 25);
    }
}
