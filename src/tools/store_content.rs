//! MCP `store_content` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `store_content` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreContentParams {
    #[schemars(description = "The text to store")]
    pub text: String,

    #[schemars(
        description = "Where the text came from, e.g. {\"kind\":\"clipboard\"}, {\"kind\":\"browser\",\"url\":\"https://...\"}, {\"kind\":\"email\",\"sender\":\"...\"}. Defaults to {\"kind\":\"manual\"}."
    )]
    pub source: Option<serde_json::Value>,

    #[schemars(description = "Semantic tags such as 'urgent_action', 'commitment', 'meeting_notes'")]
    pub tags: Option<Vec<String>>,

    #[schemars(description = "Optional JSON object of metadata. Null values are rejected.")]
    pub metadata: Option<serde_json::Value>,

    /// RFC 3339 event time; defaults to now.
    #[schemars(description = "When the event happened, RFC 3339. Defaults to now.")]
    pub timestamp: Option<String>,

    #[schemars(
        description = "Mark as user-created so retention never removes it. Defaults to true for manual sources."
    )]
    pub user_created: Option<bool>,

    #[schemars(description = "Optional caller-chosen id. Storing an existing id replaces it.")]
    pub id: Option<String>,
}
