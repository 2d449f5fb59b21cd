//! MCP `content_stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `content_stats` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ContentStatsParams {
    /// Also run the orphan check and include its report.
    #[schemars(description = "If true, run the orphan sweep first and include its report")]
    pub check_orphans: Option<bool>,
}
