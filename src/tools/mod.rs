pub mod content_stats;
pub mod delete_content;
pub mod filter;
pub mod inspect_content;
pub mod query;
pub mod retention_sweep;
pub mod search;
pub mod store_content;

use chrono::{DateTime, Utc};
use content_stats::ContentStatsParams;
use delete_content::DeleteContentParams;
use filter::FilterParams;
use inspect_content::InspectContentParams;
use query::QueryParams;
use retention_sweep::RetentionSweepParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search::SearchParams;
use std::collections::BTreeSet;
use std::sync::Arc;
use store_content::StoreContentParams;

use cairn::config::CairnConfig;
use cairn::memory::filter::{SearchFilter, TimeWindow};
use cairn::memory::types::{Metadata, RankedResult, Source, SourceKind, TextRequest};
use cairn::{MemoryEngine, StoreResult};

/// Upper bound on `max_results` for every query tool.
const MAX_RESULTS: usize = 50;

/// The Cairn MCP tool handler. Holds a clone of the engine and the config and
/// exposes every tool via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct CairnTools {
    tool_router: ToolRouter<Self>,
    engine: MemoryEngine,
    config: Arc<CairnConfig>,
}

#[tool_router]
impl CairnTools {
    pub fn new(engine: MemoryEngine, config: Arc<CairnConfig>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
            config,
        }
    }

    /// Embed and store a piece of text.
    #[tool(description = "Store a piece of captured text with its source, tags and metadata. The text is embedded and indexed for semantic search.")]
    async fn store_content(
        &self,
        Parameters(params): Parameters<StoreContentParams>,
    ) -> Result<String, String> {
        if params.text.trim().is_empty() {
            return Err("text must not be empty".into());
        }

        let source = match params.source {
            Some(value) => serde_json::from_value::<Source>(value)
                .map_err(|e| format!("invalid source: {e}"))?,
            None => Source::Manual,
        };
        let metadata = match params.metadata {
            Some(value) => serde_json::from_value::<Metadata>(value)
                .map_err(|e| format!("invalid metadata: {e}"))?,
            None => Metadata::new(),
        };

        let mut request = TextRequest::new(params.text, source);
        request.id = params.id;
        request.metadata = metadata;
        request.tags = params.tags.unwrap_or_default().into_iter().collect();
        if let Some(ts) = params.timestamp.as_deref() {
            request.timestamp = parse_time(ts)?;
        }
        if let Some(user_created) = params.user_created {
            request.user_created = user_created;
        }

        tracing::info!(
            text_len = request.text.len(),
            source = %request.source.kind(),
            tags = request.tags.len(),
            "store_content called"
        );

        let stored = self
            .engine
            .store_text(request)
            .await
            .map_err(|e| format!("store failed: {e}"))?;

        let response = match stored {
            Some(id) => {
                tracing::info!(id = %id, "content stored");
                serde_json::json!({ "id": id, "stored": true })
            }
            None => serde_json::json!({
                "stored": false,
                "message": "text produced no embedding and was not stored"
            }),
        };
        Ok(response.to_string())
    }

    /// Hybrid, similarity or keyword search.
    #[tool(description = "Search stored content by natural language. Default mode fuses vector similarity and keyword matches by reciprocal rank.")]
    async fn search(&self, Parameters(params): Parameters<SearchParams>) -> Result<String, String> {
        let k = self.limit(params.max_results);
        let mode = params.mode.as_deref().unwrap_or("hybrid");
        tracing::info!(query = %params.query, mode, k, "search called");

        let results = match mode {
            "hybrid" => self.engine.hybrid_search(params.query, None, k).await,
            "keyword" => self.engine.keyword_search(params.query, k).await,
            "similarity" => {
                let embedder = self.engine.embedder();
                let query = params.query;
                let embedding = tokio::task::spawn_blocking(move || embedder.embed(&query))
                    .await
                    .map_err(|e| format!("embedding task failed: {e}"))?;
                match embedding {
                    Some(embedding) => {
                        let threshold = self.config.retrieval.similarity_threshold;
                        self.engine.similarity_search(embedding, k, threshold).await
                    }
                    None => Ok(Vec::new()),
                }
            }
            other => {
                return Err(format!(
                    "unknown mode: {other}. Expected 'hybrid', 'similarity' or 'keyword'"
                ))
            }
        };

        Ok(results_response(results))
    }

    /// Cue-phrase driven query.
    #[tool(description = "Ask a natural language question. Words like 'urgent', 'meeting', 'follow up', 'yesterday' or 'last week' narrow results by tag and time.")]
    async fn query(&self, Parameters(params): Parameters<QueryParams>) -> Result<String, String> {
        let limit = self.limit(params.max_results);
        tracing::info!(text = %params.text, limit, "query called");
        Ok(results_response(
            self.engine.intelligent_query(params.text, limit).await,
        ))
    }

    /// Structured filter scan.
    #[tool(description = "List content matching any of the given tags, a source kind and/or an inclusive time window, newest first.")]
    async fn filter_content(
        &self,
        Parameters(params): Parameters<FilterParams>,
    ) -> Result<String, String> {
        let limit = self.limit(params.max_results);

        let source = params
            .source
            .as_deref()
            .map(str::parse::<SourceKind>)
            .transpose()?;
        let window = match (params.start.as_deref(), params.end.as_deref()) {
            (None, None) => None,
            (start, end) => {
                let start = start.map(parse_time).transpose()?.unwrap_or(DateTime::<Utc>::MIN_UTC);
                let end = end.map(parse_time).transpose()?.unwrap_or(DateTime::<Utc>::MAX_UTC);
                if start > end {
                    return Err("start must not be after end".into());
                }
                Some(TimeWindow { start, end })
            }
        };
        let filter = SearchFilter {
            tags: params.tags.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
            source,
            window,
        };

        tracing::info!(?filter, limit, "filter_content called");
        Ok(results_response(self.engine.filtered_scan(filter, limit).await))
    }

    /// Full record by id.
    #[tool(description = "Inspect a stored record by id. Returns full text, source, tags, metadata and access counters.")]
    async fn inspect_content(
        &self,
        Parameters(params): Parameters<InspectContentParams>,
    ) -> Result<String, String> {
        let record = self
            .engine
            .fetch(params.id.clone())
            .await
            .map_err(|e| format!("fetch failed: {e}"))?
            .ok_or_else(|| format!("no record with id {}", params.id))?;
        serde_json::to_string(&record).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Delete one record.
    #[tool(description = "Delete a record, its vector and its index entry. Requires confirm=true.")]
    async fn delete_content(
        &self,
        Parameters(params): Parameters<DeleteContentParams>,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err("confirm must be true to delete".into());
        }
        let deleted = self
            .engine
            .delete(params.id.clone())
            .await
            .map_err(|e| format!("delete failed: {e}"))?;
        tracing::info!(id = %params.id, deleted, "delete_content called");
        Ok(serde_json::json!({ "id": params.id, "deleted": deleted }).to_string())
    }

    /// Store statistics.
    #[tool(description = "Get store statistics: record, vector and index counts, tag and source histograms, most accessed records, search latency.")]
    async fn content_stats(
        &self,
        Parameters(params): Parameters<ContentStatsParams>,
    ) -> Result<String, String> {
        let orphans = if params.check_orphans.unwrap_or(false) {
            Some(
                self.engine
                    .orphan_sweep()
                    .await
                    .map_err(|e| format!("orphan sweep failed: {e}"))?,
            )
        } else {
            None
        };
        let stats = self
            .engine
            .stats()
            .await
            .map_err(|e| format!("stats failed: {e}"))?;

        let mut value =
            serde_json::to_value(&stats).map_err(|e| format!("serialization failed: {e}"))?;
        if let (Some(report), Some(map)) = (orphans, value.as_object_mut()) {
            map.insert(
                "orphans".into(),
                serde_json::to_value(report).map_err(|e| format!("serialization failed: {e}"))?,
            );
        }
        Ok(value.to_string())
    }

    /// Age-based retention.
    #[tool(description = "Remove content older than the configured retention window. User-created records are kept. Dry run by default.")]
    async fn retention_sweep(
        &self,
        Parameters(params): Parameters<RetentionSweepParams>,
    ) -> Result<String, String> {
        let dry_run = params.dry_run.unwrap_or(true);
        let result = self
            .engine
            .retention_sweep(dry_run)
            .await
            .map_err(|e| format!("retention sweep failed: {e}"))?;
        tracing::info!(dry_run, candidates = result.candidates.len(), deleted = result.deleted, "retention_sweep called");
        serde_json::to_string(&result).map_err(|e| format!("serialization failed: {e}"))
    }
}

impl CairnTools {
    fn limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.retrieval.default_limit)
            .clamp(1, MAX_RESULTS)
    }
}

/// Query failures surface as an empty result list with the error attached.
fn results_response(results: StoreResult<Vec<RankedResult>>) -> String {
    match results {
        Ok(results) => serde_json::json!({
            "total": results.len(),
            "results": results,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "query failed");
            serde_json::json!({
                "total": 0,
                "results": [],
                "error": e.to_string(),
            })
        }
    }
    .to_string()
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{s}': {e}"))
}

#[tool_handler]
impl ServerHandler for CairnTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Cairn stores captured text for semantic retrieval. Use store_content to save, \
                 search or query to retrieve, and inspect_content to view a record."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn::embedding::hashing::HashingEmbedder;
    use cairn::EngineSettings;

    async fn tools() -> CairnTools {
        let config = CairnConfig::default();
        let engine = MemoryEngine::open_in_memory(
            EngineSettings::from_config(&config),
            Arc::new(HashingEmbedder::new(64)),
        )
        .await
        .unwrap();
        CairnTools::new(engine, Arc::new(config))
    }

    fn store_params(text: &str) -> StoreContentParams {
        StoreContentParams {
            text: text.into(),
            source: None,
            tags: None,
            metadata: None,
            timestamp: None,
            user_created: None,
            id: None,
        }
    }

    #[tokio::test]
    async fn store_then_search() {
        let tools = tools().await;
        let mut params = store_params("reply to the vendor email about invoices");
        params.source = Some(serde_json::json!({ "kind": "email", "sender": "ap@vendor.test" }));
        params.tags = Some(vec!["email_thread".into()]);
        let stored: serde_json::Value =
            serde_json::from_str(&tools.store_content(Parameters(params)).await.unwrap()).unwrap();
        assert_eq!(stored["stored"], true);

        let found: serde_json::Value = serde_json::from_str(
            &tools
                .search(Parameters(SearchParams {
                    query: "vendor invoices".into(),
                    mode: None,
                    max_results: Some(3),
                }))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(found["total"], 1);
        assert_eq!(found["results"][0]["id"], stored["id"]);
        assert_eq!(found["results"][0]["source"]["kind"], "email");
    }

    #[tokio::test]
    async fn null_metadata_is_rejected() {
        let tools = tools().await;
        let mut params = store_params("note");
        params.metadata = Some(serde_json::json!({ "owner": null }));
        let err = tools.store_content(Parameters(params)).await.unwrap_err();
        assert!(err.starts_with("invalid metadata"));
    }

    #[tokio::test]
    async fn search_failure_returns_empty_list_with_error() {
        let tools = tools().await;
        tools.engine.close().await.unwrap();
        let response: serde_json::Value = serde_json::from_str(
            &tools
                .query(Parameters(QueryParams {
                    text: "anything urgent".into(),
                    max_results: None,
                }))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(response["total"], 0);
        assert!(response["error"].as_str().unwrap().contains("not open"));
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let tools = tools().await;
        let err = tools
            .delete_content(Parameters(DeleteContentParams {
                id: "x".into(),
                confirm: false,
            }))
            .await
            .unwrap_err();
        assert!(err.contains("confirm"));
    }

    #[tokio::test]
    async fn filter_rejects_inverted_window() {
        let tools = tools().await;
        let err = tools
            .filter_content(Parameters(FilterParams {
                tags: None,
                source: None,
                start: Some("2026-03-18T00:00:00Z".into()),
                end: Some("2026-03-17T00:00:00Z".into()),
                max_results: None,
            }))
            .await
            .unwrap_err();
        assert!(err.contains("after"));
    }
}
