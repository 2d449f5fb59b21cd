//! MCP `filter_content` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `filter_content` MCP tool. All fields combine.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FilterParams {
    #[schemars(description = "Match records carrying any of these tags")]
    pub tags: Option<Vec<String>>,

    #[schemars(
        description = "Source kind: 'clipboard', 'screen_capture', 'email', 'browser', 'meeting', 'manual'"
    )]
    pub source: Option<String>,

    #[schemars(description = "Inclusive window start, RFC 3339")]
    pub start: Option<String>,

    #[schemars(description = "Inclusive window end, RFC 3339")]
    pub end: Option<String>,

    #[schemars(description = "Maximum number of results to return (1-50). Defaults to the configured limit.")]
    pub max_results: Option<usize>,
}
