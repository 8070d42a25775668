//! Request ID generation and message construction.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use toolwire_core::{ClientResult, StructuredValue};

use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
use crate::messages::{CallToolParams, InitializeParams, PaginatedParams, methods};

/// Builds the requests of one client session, stamping each with the next id.
///
/// Ids start at 1 and are consumed when a request is built, not when it is
/// sent, so a request abandoned before sending never causes an id to repeat.
/// Parameter encoding happens first; a failed encode consumes no id.
#[derive(Debug)]
pub struct RequestBuilder {
    next_id: AtomicI64,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Creates a builder whose first request gets id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
        }
    }

    /// The id the next built request will carry.
    #[must_use]
    pub fn peek_next_id(&self) -> i64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Builds a request for an arbitrary method.
    pub fn request<P: Serialize + ?Sized>(
        &self,
        method: &str,
        params: Option<&P>,
    ) -> ClientResult<JsonRpcRequest> {
        let params = params.map(StructuredValue::encode).transpose()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(JsonRpcRequest::new(method, params, id))
    }

    /// `initialize` handshake request.
    pub fn initialize(&self, params: &InitializeParams) -> ClientResult<JsonRpcRequest> {
        self.request(methods::INITIALIZE, Some(params))
    }

    /// `notifications/initialized`, sent once the handshake reply is accepted.
    #[must_use]
    pub fn initialized(&self) -> JsonRpcNotification {
        JsonRpcNotification::new(methods::INITIALIZED, None)
    }

    /// `tools/list`, optionally continuing from a cursor.
    pub fn list_tools(&self, cursor: Option<String>) -> ClientResult<JsonRpcRequest> {
        self.list(methods::TOOLS_LIST, cursor)
    }

    /// `prompts/list`, optionally continuing from a cursor.
    pub fn list_prompts(&self, cursor: Option<String>) -> ClientResult<JsonRpcRequest> {
        self.list(methods::PROMPTS_LIST, cursor)
    }

    /// `resources/list`, optionally continuing from a cursor.
    pub fn list_resources(&self, cursor: Option<String>) -> ClientResult<JsonRpcRequest> {
        self.list(methods::RESOURCES_LIST, cursor)
    }

    /// `tools/call` for `name` with optional arguments.
    pub fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<StructuredValue>,
    ) -> ClientResult<JsonRpcRequest> {
        let params = CallToolParams {
            name: name.into(),
            arguments,
        };
        self.request(methods::TOOLS_CALL, Some(&params))
    }

    fn list(&self, method: &str, cursor: Option<String>) -> ClientResult<JsonRpcRequest> {
        // First pages go out without params at all.
        let params = cursor.map(|cursor| PaginatedParams {
            cursor: Some(cursor),
        });
        self.request(method, params.as_ref())
    }
}
