//! MCP `inspect_content` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InspectContentParams {
    #[schemars(description = "Record id")]
    pub id: String,
}
