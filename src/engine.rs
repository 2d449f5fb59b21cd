//! The storage engine handle.
//!
//! [`MemoryEngine`] is constructed once with [`MemoryEngine::open`], cloned into
//! every collaborator that needs it, and shut down with [`MemoryEngine::close`].
//! Every operation is `async` and runs its blocking SQLite and graph work on
//! `tokio::task::spawn_blocking`.
//!
//! Locking: writes take the connection mutex and then the index write lock.
//! Vector searches walk the graph under the index read lock, release it, and
//! only then take the connection to hydrate rows, so traversals run
//! concurrently with each other.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::{CairnConfig, IndexConfig, RetentionConfig, RetrievalConfig};
use crate::db;
use crate::embedding::EmbeddingProvider;
use crate::error::{StoreError, StoreResult};
use crate::index::HnswIndex;
use crate::memory::filter::{self, SearchFilter};
use crate::memory::retention::{self, EvictionResult, OrphanReport, SweepResult};
use crate::memory::search::{self, timed, MetricsSnapshot, SearchMetrics};
use crate::memory::stats::{self, StatsResponse};
use crate::memory::store;
use crate::memory::types::{ContentRecord, RankedResult, SourceKind, StoreRequest, TextRequest};

/// Most-accessed entries reported by [`MemoryEngine::stats`].
const STATS_TOP_N: usize = 10;

/// Tunables the engine needs after open.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub retention: RetentionConfig,
}

impl EngineSettings {
    pub fn from_config(config: &CairnConfig) -> Self {
        Self {
            index: config.index,
            retrieval: config.retrieval.clone(),
            retention: config.retention.clone(),
        }
    }
}

/// Cloneable handle to one open store.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    conn: Mutex<Option<Connection>>,
    index: RwLock<HnswIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: EngineSettings,
    metrics: SearchMetrics,
    db_path: Option<PathBuf>,
}

impl MemoryEngine {
    /// Open (or create) the store at `path`.
    ///
    /// Verifies the embedding dimension, loads the graph, and runs the orphan
    /// sweep before returning. With `retention.sweep_on_open` the retention
    /// sweep runs too; the capacity cap is enforced either way.
    pub async fn open(
        path: impl AsRef<Path>,
        settings: EngineSettings,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let task_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || db::open_database(&task_path))
            .await
            .map_err(join_failed)??;
        Self::start(conn, Some(path), settings, embedder).await
    }

    /// Open a fresh in-memory store. Used by tests and one-shot tools.
    pub async fn open_in_memory(
        settings: EngineSettings,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> StoreResult<Self> {
        let conn = db::open_in_memory()?;
        Self::start(conn, None, settings, embedder).await
    }

    async fn start(
        conn: Connection,
        db_path: Option<PathBuf>,
        settings: EngineSettings,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> StoreResult<Self> {
        let dimension = embedder.dimensions();
        let (conn, index) = tokio::task::spawn_blocking({
            let settings = settings.clone();
            move || -> StoreResult<(Connection, HnswIndex)> {
                let mut conn = conn;
                db::ensure_dimension(&conn, dimension)?;
                let mut index = HnswIndex::load(&conn, dimension, settings.index)?;

                retention::orphan_sweep(&mut conn, &mut index)?;
                if settings.retention.sweep_on_open {
                    retention::retention_sweep(
                        &mut conn,
                        &mut index,
                        settings.retention.retention_days,
                        Utc::now(),
                        false,
                    )?;
                }
                retention::enforce_capacity(&mut conn, &mut index, settings.retention.capacity)?;
                Ok((conn, index))
            }
        })
        .await
        .map_err(join_failed)??;

        let location = db_path
            .as_deref()
            .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
        tracing::info!(
            path = %location,
            dimension,
            vectors = index.len(),
            "engine open"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                conn: Mutex::new(Some(conn)),
                index: RwLock::new(index),
                embedder,
                settings,
                metrics: SearchMetrics::default(),
                db_path,
            }),
        })
    }

    /// Close the store. Every later call fails with [`StoreError::StoreNotOpen`].
    pub async fn close(&self) -> StoreResult<()> {
        self.blocking(|inner| {
            let mut guard = inner.conn.lock().map_err(|_| poisoned("connection"))?;
            if let Some(conn) = guard.take() {
                conn.close().map_err(|(_, e)| StoreError::from(e))?;
                tracing::info!("engine closed");
            }
            Ok(())
        })
        .await
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .conn
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.inner.embedder)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.inner.db_path.as_deref()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Store one record and enforce the capacity cap. Returns the record id.
    ///
    /// The record is committed before eviction runs. If eviction then fails it
    /// is logged and the id is still returned.
    pub async fn store(&self, request: StoreRequest) -> StoreResult<String> {
        self.blocking(move |inner| {
            inner.with_write(|conn, index| {
                let id = store::store_content(conn, index, &request)?;
                inner.evict_after_write(conn, index);
                Ok(id)
            })
        })
        .await
    }

    /// Embed the text with the injected provider, then store it.
    ///
    /// Returns `Ok(None)` when the provider declines to embed.
    pub async fn store_text(&self, request: TextRequest) -> StoreResult<Option<String>> {
        self.blocking(move |inner| {
            let Some(embedding) = inner.embedder.embed(&request.text) else {
                tracing::debug!("embedding declined, skipping storage");
                return Ok(None);
            };
            let request = request.into_store_request(embedding);
            inner.with_write(|conn, index| {
                let id = store::store_content(conn, index, &request)?;
                inner.evict_after_write(conn, index);
                Ok(Some(id))
            })
        })
        .await
    }

    /// Store many records in one transaction, then enforce the capacity cap.
    pub async fn batch_store(&self, requests: Vec<StoreRequest>) -> StoreResult<Vec<String>> {
        self.blocking(move |inner| {
            inner.with_write(|conn, index| {
                let ids = store::batch_store(conn, index, &requests)?;
                inner.evict_after_write(conn, index);
                Ok(ids)
            })
        })
        .await
    }

    /// Delete a record and its vector and index node.
    pub async fn delete(&self, id: impl Into<String>) -> StoreResult<bool> {
        let id = id.into();
        self.blocking(move |inner| inner.with_write(|conn, index| store::delete(conn, index, &id)))
            .await
    }

    // ── Point reads ──────────────────────────────────────────────────────────

    pub async fn fetch(&self, id: impl Into<String>) -> StoreResult<Option<ContentRecord>> {
        let id = id.into();
        self.blocking(move |inner| inner.with_conn(|conn| store::fetch(conn, &id)))
            .await
    }

    pub async fn fetch_embedding(&self, id: impl Into<String>) -> StoreResult<Option<Vec<f32>>> {
        let id = id.into();
        self.blocking(move |inner| inner.with_conn(|conn| store::fetch_embedding(conn, &id)))
            .await
    }

    // ── Search ───────────────────────────────────────────────────────────────

    /// Top-`k` records by cosine similarity at or above `threshold`.
    pub async fn similarity_search(
        &self,
        query: Vec<f32>,
        k: usize,
        threshold: f32,
    ) -> StoreResult<Vec<RankedResult>> {
        self.blocking(move |inner| {
            timed(&inner.metrics, || {
                let candidates =
                    inner.with_index(|index| search::ann_candidates(index, &query, k.saturating_mul(2)))?;
                inner.with_conn(|conn| search::finish_similarity(conn, candidates, k, threshold))
            })
            .map_err(StoreError::into_search)
        })
        .await
    }

    /// Case-insensitive substring search, newest first.
    pub async fn keyword_search(
        &self,
        query: impl Into<String>,
        k: usize,
    ) -> StoreResult<Vec<RankedResult>> {
        let query = query.into();
        self.blocking(move |inner| inner.with_conn(|conn| search::keyword_search(conn, &query, k)))
            .await
    }

    /// Keyword and vector results fused by reciprocal rank.
    ///
    /// With `query_embedding` of `None` the query text is embedded with the
    /// provider; if it declines, only keyword results contribute.
    pub async fn hybrid_search(
        &self,
        query: impl Into<String>,
        query_embedding: Option<Vec<f32>>,
        k: usize,
    ) -> StoreResult<Vec<RankedResult>> {
        let query = query.into();
        self.blocking(move |inner| {
            let retrieval = &inner.settings.retrieval;
            let embedding = query_embedding.or_else(|| inner.embedder.embed(&query));
            timed(&inner.metrics, || {
                let candidates = match &embedding {
                    Some(e) => Some(inner.with_index(|index| search::ann_candidates(index, e, k.saturating_mul(4)))?),
                    None => None,
                };
                inner.with_conn(|conn| {
                    search::finish_hybrid(
                        conn,
                        &query,
                        candidates,
                        k,
                        retrieval.similarity_threshold,
                        retrieval.rrf_k,
                    )
                })
            })
            .map_err(StoreError::into_search)
        })
        .await
    }

    /// Cue-phrase inferred filter narrowing a similarity search.
    pub async fn intelligent_query(
        &self,
        text: impl Into<String>,
        limit: usize,
    ) -> StoreResult<Vec<RankedResult>> {
        let text = text.into();
        self.blocking(move |inner| {
            let threshold = inner.settings.retrieval.similarity_threshold;
            let inferred = filter::infer_filter(&text, Utc::now());
            let embedding = inner.embedder.embed(&text);
            timed(&inner.metrics, || {
                let candidates = match &embedding {
                    Some(e) => Some(inner.with_index(|index| search::ann_candidates(index, e, limit.saturating_mul(4)))?),
                    None => None,
                };
                inner.with_conn(|conn| {
                    filter::finish_query(conn, &text, &inferred, candidates, limit, threshold)
                })
            })
            .map_err(StoreError::into_search)
        })
        .await
    }

    pub async fn by_tag(&self, tag: impl Into<String>, limit: usize) -> StoreResult<Vec<RankedResult>> {
        let tag = tag.into();
        self.blocking(move |inner| inner.with_conn(|conn| filter::by_tag(conn, &tag, limit)))
            .await
    }

    pub async fn by_source(&self, source: SourceKind, limit: usize) -> StoreResult<Vec<RankedResult>> {
        self.blocking(move |inner| inner.with_conn(|conn| filter::by_source(conn, source, limit)))
            .await
    }

    pub async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<RankedResult>> {
        self.blocking(move |inner| {
            inner.with_conn(|conn| filter::by_time_range(conn, start, end, limit))
        })
        .await
    }

    /// Recency scan combining any of tag, source and time window.
    pub async fn filtered_scan(
        &self,
        filter: SearchFilter,
        limit: usize,
    ) -> StoreResult<Vec<RankedResult>> {
        self.blocking(move |inner| inner.with_conn(|conn| filter::filtered_scan(conn, &filter, limit)))
            .await
    }

    // ── Retention ────────────────────────────────────────────────────────────

    /// Evict down to the configured capacity.
    pub async fn enforce_capacity(&self) -> StoreResult<EvictionResult> {
        self.blocking(|inner| inner.with_write(|conn, index| inner.evict(conn, index)))
            .await
    }

    /// Delete content older than the configured retention window.
    pub async fn retention_sweep(&self, dry_run: bool) -> StoreResult<SweepResult> {
        self.retention_sweep_at(Utc::now(), dry_run).await
    }

    /// [`MemoryEngine::retention_sweep`] with an explicit clock.
    pub async fn retention_sweep_at(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> StoreResult<SweepResult> {
        self.blocking(move |inner| {
            let days = inner.settings.retention.retention_days;
            inner.with_write(|conn, index| retention::retention_sweep(conn, index, days, now, dry_run))
        })
        .await
    }

    /// Remove vectors and index nodes that have no content row.
    pub async fn orphan_sweep(&self) -> StoreResult<OrphanReport> {
        self.blocking(|inner| inner.with_write(retention::orphan_sweep))
            .await
    }

    /// Store statistics including search latency metrics.
    pub async fn stats(&self) -> StoreResult<StatsResponse> {
        self.blocking(|inner| {
            let mut response = inner.with_conn(|conn| {
                stats::content_stats(conn, inner.db_path.as_deref(), STATS_TOP_N)
            })?;
            response.search = Some(inner.metrics.snapshot());
            Ok(response)
        })
        .await
    }

    /// Run `f` against the shared state on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&EngineInner) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(join_failed)?
    }
}

impl EngineInner {
    fn with_write<T>(
        &self,
        f: impl FnOnce(&mut Connection, &mut HnswIndex) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.conn.lock().map_err(|_| poisoned("connection"))?;
        let conn = guard.as_mut().ok_or(StoreError::StoreNotOpen)?;
        let mut index = self.index.write().map_err(|_| poisoned("index"))?;
        f(conn, &mut index)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.conn.lock().map_err(|_| poisoned("connection"))?;
        let conn = guard.as_ref().ok_or(StoreError::StoreNotOpen)?;
        f(conn)
    }

    fn with_index<T>(&self, f: impl FnOnce(&HnswIndex) -> StoreResult<T>) -> StoreResult<T> {
        let index = self.index.read().map_err(|_| poisoned("index"))?;
        f(&index)
    }

    fn evict(&self, conn: &mut Connection, index: &mut HnswIndex) -> StoreResult<EvictionResult> {
        retention::enforce_capacity(conn, index, self.settings.retention.capacity)
            .map_err(StoreError::into_insert)
    }

    /// The write has already committed; a failed eviction is retried by the
    /// next write or by [`MemoryEngine::enforce_capacity`].
    fn evict_after_write(&self, conn: &mut Connection, index: &mut HnswIndex) {
        if let Err(e) = self.evict(conn, index) {
            tracing::warn!(error = %e, "capacity eviction failed after write");
        }
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::EngineExecutionFailed(format!("{what} lock poisoned"))
}

fn join_failed(e: tokio::task::JoinError) -> StoreError {
    StoreError::EngineExecutionFailed(format!("blocking task failed: {e}"))
}
