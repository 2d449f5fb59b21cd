//! MCP `retention_sweep` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `retention_sweep` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RetentionSweepParams {
    /// Defaults to `true`: report what would be deleted without deleting.
    #[schemars(
        description = "If true (default), only report what would be deleted. Set false to delete."
    )]
    pub dry_run: Option<bool>,
}
