pub mod filter;
pub mod retention;
pub mod search;
pub mod stats;
pub mod store;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::index::HnswIndex;

/// Encode an f32 embedding as little-endian bytes for the `vectors` table.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode little-endian bytes back into an f32 embedding. Trailing bytes are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Truncate text to `max_chars` characters, appending "..." if truncated.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Current time in the RFC 3339 form used for `created_at`, `updated_at` and `last_accessed`.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Event timestamps are stored as Unix milliseconds.
pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// SQLite `LIMIT` values are signed 64-bit.
pub(crate) fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Run `work` in one SQLite transaction together with the index rows it dirtied.
///
/// On success the dirty index nodes are persisted in the same transaction and it
/// commits. On any failure the transaction rolls back and the in-memory graph is
/// reloaded from disk so it never reflects uncommitted writes.
pub(crate) fn transact<T>(
    conn: &mut Connection,
    index: &mut HnswIndex,
    work: impl FnOnce(&Transaction<'_>, &mut HnswIndex) -> StoreResult<T>,
) -> StoreResult<T> {
    let outcome = {
        let tx = conn.transaction()?;
        let result = work(&tx, index).and_then(|value| {
            index.persist(&tx)?;
            Ok(value)
        });
        match result {
            Ok(value) => tx.commit().map(|_| value).map_err(StoreError::from),
            Err(e) => Err(e),
        }
    };

    if let Err(ref e) = outcome {
        tracing::warn!(error = %e, "transaction rolled back, reloading index");
        match HnswIndex::load(conn, index.dimension(), *index.config()) {
            Ok(fresh) => *index = fresh,
            Err(reload_err) => {
                tracing::error!(error = %reload_err, "failed to reload index after rollback")
            }
        }
    }

    outcome
}
