//! MCP `delete_content` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `delete_content` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteContentParams {
    #[schemars(description = "Record id to delete")]
    pub id: String,

    #[schemars(description = "Must be true to actually delete. Safety gate.")]
    pub confirm: bool,
}
