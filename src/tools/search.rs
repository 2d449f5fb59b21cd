//! MCP `search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    /// `"hybrid"` (default), `"similarity"` or `"keyword"`.
    #[schemars(
        description = "Search mode: 'hybrid' (vector + keyword fused, default), 'similarity' (vector only), 'keyword' (substring match only)"
    )]
    pub mode: Option<String>,

    #[schemars(description = "Maximum number of results to return (1-50). Defaults to the configured limit.")]
    pub max_results: Option<usize>,
}
