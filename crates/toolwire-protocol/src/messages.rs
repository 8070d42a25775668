//! MCP protocol messages.
//!
//! Parameter and result types for the methods toolwire issues.

use serde::{Deserialize, Serialize};
use toolwire_core::StructuredValue;

use crate::types::{
    ClientCapabilities, ClientInfo, Content, Prompt, Resource, ServerCapabilities, ServerInfo,
    Tool,
};

/// Method names.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake acknowledgement notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// List tools.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Invoke a tool.
    pub const TOOLS_CALL: &str = "tools/call";
    /// List prompts.
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// List resources.
    pub const RESOURCES_LIST: &str = "resources/list";
}

// ============================================================================
// Initialize
// ============================================================================

/// Initialize request params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version requested.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
    /// Client info.
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Initialize response result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version accepted.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server info.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    /// Optional instructions for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ============================================================================
// Pagination
// ============================================================================

/// Cursor parameter shared by every list method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginatedParams {
    /// Cursor returned by the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A page of a list result.
pub trait Page {
    /// Item type listed by this method.
    type Item;

    /// Splits the page into its items and the cursor of the next page.
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

macro_rules! list_result {
    ($(#[$doc:meta])* $name:ident, $field:ident: $item:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            /// Items on this page.
            #[serde(default)]
            pub $field: Vec<$item>,
            /// Next cursor for pagination.
            #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
            pub next_cursor: Option<String>,
        }

        impl Page for $name {
            type Item = $item;

            fn into_parts(self) -> (Vec<$item>, Option<String>) {
                (self.$field, self.next_cursor)
            }
        }
    };
}

list_result!(
    /// tools/list response result.
    ListToolsResult, tools: Tool
);
list_result!(
    /// prompts/list response result.
    ListPromptsResult, prompts: Prompt
);
list_result!(
    /// resources/list response result.
    ListResourcesResult, resources: Resource
);

// ============================================================================
// Tools
// ============================================================================

/// tools/call request params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name to call.
    pub name: String,
    /// Tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<StructuredValue>,
}

/// tools/call response result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Tool output content.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether the tool itself reported failure.
    #[serde(
        rename = "isError",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_error: bool,
    /// Machine-readable output, when the tool declares an output schema.
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<StructuredValue>,
}

impl CallToolResult {
    /// Concatenates all text blocks, one per line.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
