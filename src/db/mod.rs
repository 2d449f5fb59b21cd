pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

use crate::error::{StoreError, StoreResult};

/// Open (or create) the cairn database at the given path with schema and
/// migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> StoreResult<Connection> {
    let path = path.as_ref();
    let open_failed = |message: String| StoreError::OpenFailed {
        path: path.display().to_string(),
        message,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            open_failed(format!("failed to create directory {}: {e}", parent.display()))
        })?;
    }

    let mut conn = Connection::open(path).map_err(|e| open_failed(e.to_string()))?;

    // WAL lets readers proceed while the single writer commits
    conn.pragma_update(None, "journal_mode", "WAL")
        .and_then(|_| conn.pragma_update(None, "foreign_keys", "ON"))
        .and_then(|_| conn.pragma_update(None, "busy_timeout", 5000))
        .map_err(|e| open_failed(e.to_string()))?;

    initialize(&mut conn).map_err(|e| open_failed(e.to_string()))?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with schema and migrations applied.
pub fn open_in_memory() -> StoreResult<Connection> {
    let open_failed = |e: rusqlite::Error| StoreError::OpenFailed {
        path: ":memory:".into(),
        message: e.to_string(),
    };
    let mut conn = Connection::open_in_memory().map_err(open_failed)?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(open_failed)?;
    initialize(&mut conn).map_err(open_failed)?;
    Ok(conn)
}

fn initialize(conn: &mut Connection) -> rusqlite::Result<()> {
    schema::init_schema(conn)?;
    migrations::run_migrations(conn)
}

/// Record `dimension` on a fresh store, or verify it against the stored one.
pub fn ensure_dimension(conn: &Connection, dimension: usize) -> StoreResult<()> {
    if dimension == 0 {
        return Err(StoreError::InvalidInput("embedding dimension must be positive".into()));
    }
    match migrations::get_dimension(conn)? {
        Some(stored) if stored != dimension => Err(StoreError::DimensionMismatch {
            expected: stored,
            actual: dimension,
        }),
        Some(_) => Ok(()),
        None => {
            migrations::set_dimension(conn, dimension)?;
            Ok(())
        }
    }
}

/// Result of [`check_database_health`].
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: u32,
    pub dimension: Option<usize>,
    pub content_count: u64,
    pub vector_count: u64,
    pub node_count: u64,
    /// Vector rows with no content row.
    pub orphan_vectors: u64,
    /// Index nodes with no vector row.
    pub orphan_nodes: u64,
    /// Content rows with no vector row.
    pub missing_vectors: u64,
}

/// Run SQLite's integrity check and count rows and cross-store inconsistencies.
pub fn check_database_health(conn: &Connection) -> rusqlite::Result<HealthReport> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let count = |sql: &str| -> rusqlite::Result<u64> {
        conn.query_row(sql, [], |row| row.get::<_, i64>(0)).map(|n| n as u64)
    };

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
        schema_version: migrations::get_schema_version(conn)?,
        dimension: migrations::get_dimension(conn)?,
        content_count: count("SELECT COUNT(*) FROM content")?,
        vector_count: count("SELECT COUNT(*) FROM vectors")?,
        node_count: count("SELECT COUNT(*) FROM index_nodes")?,
        orphan_vectors: count(
            "SELECT COUNT(*) FROM vectors v WHERE NOT EXISTS (SELECT 1 FROM content c WHERE c.id = v.id)",
        )?,
        orphan_nodes: count(
            "SELECT COUNT(*) FROM index_nodes n WHERE NOT EXISTS (SELECT 1 FROM vectors v WHERE v.id = n.id)",
        )?,
        missing_vectors: count(
            "SELECT COUNT(*) FROM content c WHERE NOT EXISTS (SELECT 1 FROM vectors v WHERE v.id = c.id)",
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_database_is_migrated() {
        let conn = open_in_memory().unwrap();
        assert_eq!(
            migrations::get_schema_version(&conn).unwrap(),
            migrations::CURRENT_SCHEMA_VERSION
        );
    }

    #[test]
    fn ensure_dimension_records_then_verifies() {
        let conn = open_in_memory().unwrap();
        ensure_dimension(&conn, 8).unwrap();
        ensure_dimension(&conn, 8).unwrap();
        let err = ensure_dimension(&conn, 16).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 8, actual: 16 }));
        assert!(matches!(ensure_dimension(&conn, 0), Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn health_report_counts_orphans() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO vectors (id, dimension, embedding, magnitude) VALUES ('ghost', 1, x'0000803f', 1.0)",
            [],
        )
        .unwrap();
        let report = check_database_health(&conn).unwrap();
        assert!(report.integrity_ok);
        assert_eq!(report.vector_count, 1);
        assert_eq!(report.orphan_vectors, 1);
        assert_eq!(report.content_count, 0);
    }
}
