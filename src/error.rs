//! Engine error taxonomy.
//!
//! Every storage and retrieval operation returns [`StoreResult`]. Malformed input
//! and dimension mismatches are reported before any write happens; database faults
//! surface as the category of the operation that hit them.

use thiserror::Error;

/// Errors produced by the storage and retrieval engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine was closed (or never opened) before the call.
    #[error("store is not open")]
    StoreNotOpen,

    /// The database could not be opened or initialized.
    #[error("failed to open store at '{path}': {message}")]
    OpenFailed {
        /// Path of the database file (`:memory:` for in-memory stores)
        path: String,
        /// Underlying error message
        message: String,
    },

    /// A write transaction failed and was rolled back.
    #[error("insert failed: {0}")]
    InsertFailed(String),

    /// A query failed. Callers should treat this as an empty result.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// An embedding does not match the dimension recorded for this store.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store was created with
        expected: usize,
        /// Dimension of the rejected vector
        actual: usize,
    },

    /// Input rejected before any write (empty text, non-finite vector, bad id).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic engine fault: lock poisoning, task join failures, raw SQLite errors.
    #[error("engine execution failed: {0}")]
    EngineExecutionFailed(String),
}

/// Convenience alias used across the engine.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Re-label a generic engine fault as an insert failure. Typed errors pass through.
    pub(crate) fn into_insert(self) -> Self {
        match self {
            Self::EngineExecutionFailed(message) => Self::InsertFailed(message),
            other => other,
        }
    }

    /// Re-label a generic engine fault as a search failure. Typed errors pass through.
    pub(crate) fn into_search(self) -> Self {
        match self {
            Self::EngineExecutionFailed(message) => Self::SearchFailed(message),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::EngineExecutionFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::EngineExecutionFailed(format!("serialization error: {e}"))
    }
}
