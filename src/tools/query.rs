//! MCP `query` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `query` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    #[schemars(
        description = "Natural language question. Cue words narrow the search: 'urgent', 'email', 'meeting', 'follow up', 'promise', 'today', 'yesterday', 'this week', 'last week'."
    )]
    pub text: String,

    #[schemars(description = "Maximum number of results to return (1-50). Defaults to the configured limit.")]
    pub max_results: Option<usize>,
}
