//! Tag, source and time-range filters, and cue-phrase query inference.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use super::search::{ann_candidates, keyword_search, rank_candidates, record_access, result_ids, ScoredCandidate};
use super::sql_limit;
use super::store::{record_from_row, RECORD_SELECT};
use super::types::{ContentRecord, RankedResult, SourceKind};
use crate::error::{StoreError, StoreResult};
use crate::index::HnswIndex;

/// Cue phrases and the tag each one implies.
const TAG_CUES: &[(&[&str], &str)] = &[
    (&["urgent", "important", "asap"], "urgent_action"),
    (&["email", "inbox"], "email_thread"),
    (&["meeting"], "meeting_notes"),
    (&["follow up", "follow-up", "followup"], "followup_required"),
    (&["promise", "commit"], "commitment"),
];

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Restrictions applied to a scan or to re-ranked candidates.
///
/// Tags match any-of; every populated field must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchFilter {
    pub tags: BTreeSet<String>,
    pub source: Option<SourceKind>,
    pub window: Option<TimeWindow>,
}

impl SearchFilter {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tags: BTreeSet::from([tag.into()]),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.source.is_none() && self.window.is_none()
    }

    pub fn matches(&self, record: &ContentRecord) -> bool {
        (self.tags.is_empty() || !self.tags.is_disjoint(&record.tags))
            && self.source.map_or(true, |s| record.source.kind() == s)
            && self.window.map_or(true, |w| w.contains(record.timestamp))
    }
}

/// Records carrying `tag`, newest first, each scored `1.0`.
pub fn by_tag(conn: &Connection, tag: &str, limit: usize) -> StoreResult<Vec<RankedResult>> {
    filtered_scan(conn, &SearchFilter::tag(tag), limit)
}

/// Records from one source kind, newest first, each scored `1.0`.
pub fn by_source(conn: &Connection, source: SourceKind, limit: usize) -> StoreResult<Vec<RankedResult>> {
    let filter = SearchFilter {
        source: Some(source),
        ..SearchFilter::default()
    };
    filtered_scan(conn, &filter, limit)
}

/// Records whose timestamp falls in `[start, end]`, newest first, each scored `1.0`.
pub fn by_time_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: usize,
) -> StoreResult<Vec<RankedResult>> {
    if start > end {
        return Err(StoreError::InvalidInput(format!(
            "time range start {start} is after end {end}"
        )));
    }
    let filter = SearchFilter {
        window: Some(TimeWindow { start, end }),
        ..SearchFilter::default()
    };
    filtered_scan(conn, &filter, limit)
}

/// Recency-ordered scan restricted by `filter`. An empty filter returns the
/// newest records.
pub fn filtered_scan(
    conn: &Connection,
    filter: &SearchFilter,
    limit: usize,
) -> StoreResult<Vec<RankedResult>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !filter.tags.is_empty() {
        let mut placeholders = Vec::with_capacity(filter.tags.len());
        for tag in &filter.tags {
            values.push(Value::Text(tag.clone()));
            placeholders.push(format!("?{}", values.len()));
        }
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM content_tags ft WHERE ft.content_id = c.id AND ft.tag IN ({}))",
            placeholders.join(", ")
        ));
    }
    if let Some(source) = filter.source {
        values.push(Value::Text(source.as_str().to_string()));
        clauses.push(format!("c.source_kind = ?{}", values.len()));
    }
    if let Some(window) = filter.window {
        values.push(Value::Integer(window.start.timestamp_millis()));
        values.push(Value::Integer(window.end.timestamp_millis()));
        clauses.push(format!(
            "c.timestamp_ms BETWEEN ?{} AND ?{}",
            values.len() - 1,
            values.len()
        ));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "{RECORD_SELECT}{where_clause} ORDER BY c.timestamp_ms DESC, c.id DESC LIMIT {}",
        sql_limit(limit)
    );

    let run = || -> rusqlite::Result<Vec<RankedResult>> {
        let mut stmt = conn.prepare(&sql)?;
        let results = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)?
            .map(|r| r.map(|record| RankedResult::from_record(record, 1.0)))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    };
    run().map_err(|e| StoreError::SearchFailed(e.to_string()))
}

/// Infer a filter from cue phrases in a natural-language query.
///
/// Tag cues match at word starts, so "emails" implies `email_thread`. Time cues
/// produce a UTC window relative to `now`. When several appear, priority is
/// "yesterday", then "last week", then "today", then "this week".
pub fn infer_filter(text: &str, now: DateTime<Utc>) -> SearchFilter {
    let normalized = normalize(text);
    let has_cue = |cue: &str| normalized.contains(&format!(" {}", normalize(cue).trim()));

    let tags = TAG_CUES
        .iter()
        .filter(|(cues, _)| cues.iter().any(|cue| has_cue(*cue)))
        .map(|(_, tag)| tag.to_string())
        .collect();

    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let week_start = midnight - Duration::days(i64::from(now.weekday().num_days_from_monday()));
    let just_before = |t: DateTime<Utc>| t - Duration::milliseconds(1);

    let window = if has_cue("yesterday") {
        Some(TimeWindow {
            start: midnight - Duration::days(1),
            end: just_before(midnight),
        })
    } else if has_cue("last week") {
        Some(TimeWindow {
            start: week_start - Duration::days(7),
            end: just_before(week_start),
        })
    } else if has_cue("today") {
        Some(TimeWindow { start: midnight, end: now })
    } else if has_cue("this week") {
        Some(TimeWindow { start: week_start, end: now })
    } else {
        None
    };

    SearchFilter {
        tags,
        source: None,
        window,
    }
}

/// Heuristic natural-language query.
///
/// Infers a filter from cue phrases, then runs a similarity search for
/// `2 × limit` results narrowed by it and truncates to `limit`. Without an
/// embedding it falls back to the filtered recency scan, and with no filter
/// either, to keyword search.
pub fn intelligent_query(
    conn: &Connection,
    index: &HnswIndex,
    text: &str,
    embedding: Option<&[f32]>,
    limit: usize,
    threshold: f32,
    now: DateTime<Utc>,
) -> StoreResult<Vec<RankedResult>> {
    let filter = infer_filter(text, now);
    let candidates = embedding
        .map(|e| ann_candidates(index, e, limit.saturating_mul(4)))
        .transpose()
        .map_err(StoreError::into_search)?;
    finish_query(conn, text, &filter, candidates, limit, threshold)
}

/// Second phase of [`intelligent_query`].
pub fn finish_query(
    conn: &Connection,
    text: &str,
    filter: &SearchFilter,
    candidates: Option<Vec<ScoredCandidate>>,
    limit: usize,
    threshold: f32,
) -> StoreResult<Vec<RankedResult>> {
    tracing::debug!(?filter, has_embedding = candidates.is_some(), "intelligent query");

    let results = match candidates {
        Some(candidates) => {
            let narrowed = (!filter.is_empty()).then_some(filter);
            let mut results = rank_candidates(conn, candidates, limit.saturating_mul(2), threshold, narrowed)?;
            results.truncate(limit);
            record_access(conn, &result_ids(&results))?;
            results
        }
        None if !filter.is_empty() => filtered_scan(conn, filter, limit)?,
        None => keyword_search(conn, text, limit)?,
    };
    Ok(results)
}

/// Lowercase, non-alphanumerics to single spaces, padded with a leading space.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    out.push(' ');
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_lowercase());
        out.push(' ');
    }
    out
}
