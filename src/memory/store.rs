//! Write path and point reads for the content and vector stores.
//!
//! [`store_content`] and [`batch_store`] validate every request before opening
//! a transaction, then write the content row, its tags, the vector row and the
//! index node together. A failure anywhere rolls all of it back.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;

use super::types::{ContentRecord, MetadataValue, StoreRequest, VectorRecord};
use super::{bytes_to_embedding, embedding_to_bytes, millis_to_datetime, now_rfc3339, transact};
use crate::error::{StoreError, StoreResult};
use crate::index::HnswIndex;
use crate::similarity;

/// Column list shared by every query that hydrates a [`ContentRecord`].
/// Tags are folded into a JSON array per row.
pub(crate) const RECORD_SELECT: &str = "SELECT c.id, c.text, c.source, c.metadata, c.timestamp_ms, \
     c.user_created, c.access_count, c.last_accessed, c.created_at, c.updated_at, \
     (SELECT json_group_array(t.tag) FROM content_tags t WHERE t.content_id = c.id) \
     FROM content c";

/// Keep IN clauses well under SQLite's bound-parameter limit.
const HYDRATE_CHUNK: usize = 500;

/// Store one record. Returns its id (generated as UUID v7 when absent).
///
/// Re-storing an existing id replaces text, source, tags, metadata, timestamp
/// and embedding while keeping access bookkeeping and `created_at`.
pub fn store_content(
    conn: &mut Connection,
    index: &mut HnswIndex,
    request: &StoreRequest,
) -> StoreResult<String> {
    validate(request, index.dimension())?;
    transact(conn, index, |tx, index| write_record(tx, index, request))
        .map_err(StoreError::into_insert)
}

/// Store many records under one transaction. Nothing is written unless every
/// request validates.
pub fn batch_store(
    conn: &mut Connection,
    index: &mut HnswIndex,
    requests: &[StoreRequest],
) -> StoreResult<Vec<String>> {
    for request in requests {
        validate(request, index.dimension())?;
    }
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let ids = transact(conn, index, |tx, index| {
        requests
            .iter()
            .map(|request| write_record(tx, index, request))
            .collect::<StoreResult<Vec<_>>>()
    })
    .map_err(StoreError::into_insert)?;

    tracing::debug!(count = ids.len(), "batch stored");
    Ok(ids)
}

/// Fetch a content record by id.
pub fn fetch(conn: &Connection, id: &str) -> StoreResult<Option<ContentRecord>> {
    let sql = format!("{RECORD_SELECT} WHERE c.id = ?1");
    Ok(conn.query_row(&sql, params![id], record_from_row).optional()?)
}

/// Fetch the stored vector row for `id`.
pub fn fetch_vector(conn: &Connection, id: &str) -> StoreResult<Option<VectorRecord>> {
    let row = conn
        .query_row(
            "SELECT id, dimension, embedding, magnitude FROM vectors WHERE id = ?1",
            params![id],
            |row| {
                Ok(VectorRecord {
                    id: row.get(0)?,
                    dimension: row.get::<_, i64>(1)? as usize,
                    embedding: bytes_to_embedding(&row.get::<_, Vec<u8>>(2)?),
                    magnitude: row.get::<_, f64>(3)? as f32,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Fetch only the embedding for `id`.
pub fn fetch_embedding(conn: &Connection, id: &str) -> StoreResult<Option<Vec<f32>>> {
    Ok(fetch_vector(conn, id)?.map(|v| v.embedding))
}

/// Delete a record with its tags, vector and index node. Returns whether
/// anything existed.
pub fn delete(conn: &mut Connection, index: &mut HnswIndex, id: &str) -> StoreResult<bool> {
    let existed = transact(conn, index, |tx, index| {
        let existed = delete_rows(tx, id)?;
        index.remove(id);
        Ok(existed)
    })?;
    if existed {
        tracing::debug!(id, "deleted");
    }
    Ok(existed)
}

/// Batch-fetch content records by id.
pub(crate) fn hydrate(conn: &Connection, ids: &[&str]) -> StoreResult<HashMap<String, ContentRecord>> {
    let mut records = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(HYDRATE_CHUNK) {
        // Build a parameterized IN clause
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{i}")).collect();
        let sql = format!("{RECORD_SELECT} WHERE c.id IN ({})", placeholders.join(", "));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), record_from_row)?;
        for row in rows {
            let record = row?;
            records.insert(record.id.clone(), record);
        }
    }
    Ok(records)
}

/// Delete content, tag and vector rows for `id`. The caller removes the index node.
pub(crate) fn delete_rows(tx: &Transaction<'_>, id: &str) -> rusqlite::Result<bool> {
    tx.execute("DELETE FROM content_tags WHERE content_id = ?1", params![id])?;
    let vectors = tx.execute("DELETE FROM vectors WHERE id = ?1", params![id])?;
    let content = tx.execute("DELETE FROM content WHERE id = ?1", params![id])?;
    Ok(vectors + content > 0)
}

pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ContentRecord> {
    let source: String = row.get(2)?;
    let metadata: Option<String> = row.get(3)?;
    let tags: String = row.get(10)?;

    Ok(ContentRecord {
        id: row.get(0)?,
        text: row.get(1)?,
        source: parse_json(2, &source)?,
        tags: parse_json(10, &tags)?,
        metadata: metadata
            .map(|m| parse_json(3, &m))
            .transpose()?
            .unwrap_or_default(),
        timestamp: millis_to_datetime(row.get(4)?),
        user_created: row.get(5)?,
        access_count: row.get(6)?,
        last_accessed: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn parse_json<T: DeserializeOwned>(column: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Reject malformed requests before anything touches the database.
fn validate(request: &StoreRequest, dimension: usize) -> StoreResult<()> {
    if request.text.trim().is_empty() {
        return Err(StoreError::InvalidInput("text must not be empty".into()));
    }
    if let Some(id) = &request.id {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidInput("id must not be blank".into()));
        }
    }
    if request.embedding.len() != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: request.embedding.len(),
        });
    }
    if request.embedding.iter().any(|x| !x.is_finite()) {
        return Err(StoreError::InvalidInput(
            "embedding contains non-finite components".into(),
        ));
    }
    if similarity::magnitude(&request.embedding) <= f32::EPSILON {
        return Err(StoreError::InvalidInput("embedding is a zero vector".into()));
    }
    if let Some(key) = request
        .metadata
        .iter()
        .find_map(|(key, value)| (!metadata_is_finite(value)).then_some(key))
    {
        return Err(StoreError::InvalidInput(format!(
            "metadata field '{key}' contains a non-finite number"
        )));
    }
    Ok(())
}

/// JSON has no NaN or infinity; they would be written as `null` and never read back.
fn metadata_is_finite(value: &MetadataValue) -> bool {
    match value {
        MetadataValue::Number(n) => n.is_finite(),
        MetadataValue::List(items) => items.iter().all(metadata_is_finite),
        MetadataValue::Map(fields) => fields.values().all(metadata_is_finite),
        MetadataValue::Bool(_) | MetadataValue::String(_) => true,
    }
}

fn write_record(
    tx: &Transaction<'_>,
    index: &mut HnswIndex,
    request: &StoreRequest,
) -> StoreResult<String> {
    let id = request
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let now = now_rfc3339();
    let source = serde_json::to_string(&request.source)?;
    let metadata = if request.metadata.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&request.metadata)?)
    };

    // 1. Content row
    tx.execute(
        "INSERT INTO content (id, text, source_kind, source, metadata, timestamp_ms,
                              user_created, access_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            source_kind = excluded.source_kind,
            source = excluded.source,
            metadata = excluded.metadata,
            timestamp_ms = excluded.timestamp_ms,
            user_created = excluded.user_created,
            updated_at = excluded.updated_at",
        params![
            id,
            request.text,
            request.source.kind().as_str(),
            source,
            metadata,
            request.timestamp.timestamp_millis(),
            request.user_created,
            now,
        ],
    )?;

    // 2. Tags
    tx.execute("DELETE FROM content_tags WHERE content_id = ?1", params![id])?;
    {
        let mut stmt =
            tx.prepare_cached("INSERT OR IGNORE INTO content_tags (content_id, tag) VALUES (?1, ?2)")?;
        for tag in request.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            stmt.execute(params![id, tag])?;
        }
    }

    // 3. Vector row
    tx.execute(
        "INSERT INTO vectors (id, dimension, embedding, magnitude) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            dimension = excluded.dimension,
            embedding = excluded.embedding,
            magnitude = excluded.magnitude",
        params![
            id,
            request.embedding.len() as i64,
            embedding_to_bytes(&request.embedding),
            similarity::magnitude(&request.embedding) as f64,
        ],
    )?;

    // 4. Graph node, persisted by the enclosing transaction
    index.insert(&id, request.embedding.clone())?;

    tracing::debug!(id = %id, kind = %request.source.kind(), tags = request.tags.len(), "stored");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::db::open_in_memory;
    use crate::memory::types::{MetadataValue, Source};

    fn setup() -> (Connection, HnswIndex) {
        (open_in_memory().unwrap(), HnswIndex::new(3, IndexConfig::default()))
    }

    fn email() -> Source {
        Source::Email {
            sender: Some("dana@example.com".into()),
            subject: None,
        }
    }

    #[test]
    fn store_then_fetch_round_trips_fields() {
        let (mut conn, mut index) = setup();
        let request = StoreRequest::new("Budget review Friday", vec![1.0, 2.0, 2.0], email())
            .with_tags(["commitment", "email_thread"])
            .with_metadata("thread_len", 4.0)
            .with_metadata("flagged", true);

        let id = store_content(&mut conn, &mut index, &request).unwrap();
        let record = fetch(&conn, &id).unwrap().unwrap();

        assert_eq!(record.text, request.text);
        assert_eq!(record.source, request.source);
        assert_eq!(record.tags, request.tags);
        assert_eq!(record.metadata.get("flagged"), Some(&MetadataValue::Bool(true)));
        assert_eq!(record.timestamp.timestamp_millis(), request.timestamp.timestamp_millis());
        assert_eq!(record.access_count, 0);

        let vector = fetch_vector(&conn, &id).unwrap().unwrap();
        assert_eq!(vector.dimension, 3);
        assert!((vector.magnitude - 3.0).abs() < 1e-6);
        assert!(index.contains(&id));
        assert!(!index.has_pending_changes());
    }

    #[test]
    fn validation_happens_before_any_write() {
        let (mut conn, mut index) = setup();
        let cases = [
            StoreRequest::new("   ", vec![1.0, 0.0, 0.0], Source::Clipboard),
            StoreRequest::new("x", vec![0.0, 0.0, 0.0], Source::Clipboard),
            StoreRequest::new("x", vec![f32::NAN, 1.0, 0.0], Source::Clipboard),
            StoreRequest::new("x", vec![1.0, 0.0], Source::Clipboard),
        ];
        for request in &cases {
            assert!(store_content(&mut conn, &mut index, request).is_err());
        }
        let err = store_content(&mut conn, &mut index, &cases[3]).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 2 }));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM content", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn non_finite_metadata_is_rejected() {
        let (mut conn, mut index) = setup();
        let nested = MetadataValue::Map(
            [(
                "scores".to_string(),
                MetadataValue::List(vec![1.0.into(), f64::INFINITY.into()]),
            )]
            .into_iter()
            .collect(),
        );
        let cases = [
            StoreRequest::new("budget email", vec![1.0, 0.0, 0.0], Source::Clipboard)
                .with_metadata("score", f64::NAN),
            StoreRequest::new("budget email", vec![1.0, 0.0, 0.0], Source::Clipboard)
                .with_metadata("score", f64::NEG_INFINITY),
            StoreRequest::new("budget email", vec![1.0, 0.0, 0.0], Source::Clipboard)
                .with_metadata("stats", nested),
        ];
        for request in &cases {
            let err = store_content(&mut conn, &mut index, request).unwrap_err();
            assert!(matches!(err, StoreError::InvalidInput(_)), "{err:?}");
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM content", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(index.is_empty());

        let ok = StoreRequest::new("budget email", vec![1.0, 0.0, 0.0], Source::Clipboard)
            .with_metadata("score", 0.5);
        let id = store_content(&mut conn, &mut index, &ok).unwrap();
        assert!(fetch(&conn, &id).unwrap().is_some());
    }

    #[test]
    fn restore_replaces_record_and_tags() {
        let (mut conn, mut index) = setup();
        let first = StoreRequest::new("v1", vec![1.0, 0.0, 0.0], Source::Clipboard)
            .with_id("fixed")
            .with_tags(["a", "b"]);
        store_content(&mut conn, &mut index, &first).unwrap();
        conn.execute("UPDATE content SET access_count = 7 WHERE id = 'fixed'", [])
            .unwrap();

        let second = StoreRequest::new("v2", vec![0.0, 1.0, 0.0], Source::Clipboard)
            .with_id("fixed")
            .with_tags(["c"]);
        store_content(&mut conn, &mut index, &second).unwrap();

        let record = fetch(&conn, "fixed").unwrap().unwrap();
        assert_eq!(record.text, "v2");
        assert_eq!(record.tags.iter().collect::<Vec<_>>(), ["c"]);
        assert_eq!(record.access_count, 7);
        assert_eq!(fetch_embedding(&conn, "fixed").unwrap().unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let (mut conn, mut index) = setup();
        let good = StoreRequest::new("ok", vec![1.0, 0.0, 0.0], Source::Manual);
        let bad = StoreRequest::new("bad", vec![1.0, 0.0], Source::Manual);
        assert!(batch_store(&mut conn, &mut index, &[good.clone(), bad]).is_err());
        assert!(index.is_empty());

        let ids = batch_store(&mut conn, &mut index, &[good.clone(), good]).unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn failed_transaction_restores_index_from_disk() {
        let (mut conn, mut index) = setup();
        store_content(
            &mut conn,
            &mut index,
            &StoreRequest::new("keep", vec![1.0, 0.0, 0.0], Source::Manual).with_id("keep"),
        )
        .unwrap();

        // Fail at the last step, after the graph already holds the node in memory
        conn.execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON index_nodes WHEN NEW.id = 'boom'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        let err = store_content(
            &mut conn,
            &mut index,
            &StoreRequest::new("boom", vec![0.0, 1.0, 0.0], Source::Manual).with_id("boom"),
        )
        .unwrap_err();

        assert!(matches!(err, StoreError::InsertFailed(_)));
        assert!(fetch(&conn, "boom").unwrap().is_none());
        assert!(!index.contains("boom"));
        assert!(index.contains("keep"));
    }

    #[test]
    fn delete_cascades_everything() {
        let (mut conn, mut index) = setup();
        let request = StoreRequest::new("gone soon", vec![1.0, 1.0, 0.0], Source::Clipboard)
            .with_tags(["x"]);
        let id = store_content(&mut conn, &mut index, &request).unwrap();

        assert!(delete(&mut conn, &mut index, &id).unwrap());
        assert!(!delete(&mut conn, &mut index, &id).unwrap());
        assert!(fetch(&conn, &id).unwrap().is_none());
        assert!(fetch_embedding(&conn, &id).unwrap().is_none());
        assert!(!index.contains(&id));

        for table in ["content_tags", "vectors", "index_nodes"] {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0, "{table} not empty");
        }
    }
}
