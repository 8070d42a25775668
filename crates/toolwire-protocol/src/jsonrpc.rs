//! JSON-RPC 2.0 message types.

use serde::{Deserialize, Deserializer, Serialize};
use toolwire_core::{ClientError, ClientResult, StructuredValue};

/// The only protocol version toolwire speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request ID.
///
/// Equality and hashing cover both the variant and the value, so `1` and
/// `"1"` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer ID.
    Number(i64),
    /// String ID.
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_owned())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Keeps an explicit `null` as `Some(Null)` so it is not mistaken for a
/// missing member.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<StructuredValue>, D::Error> {
    StructuredValue::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (always "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<StructuredValue>,
}

impl JsonRpcRequest {
    /// Creates a new request with the given method and parameters.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<StructuredValue>,
        id: impl Into<RequestId>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification. Never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version (always "2.0").
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Notification parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<StructuredValue>,
}

impl JsonRpcNotification {
    /// Creates a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<StructuredValue>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub data: Option<StructuredValue>,
}

impl From<JsonRpcError> for ClientError {
    fn from(err: JsonRpcError) -> Self {
        ClientError::server(err.code, err.message, err.data)
    }
}

/// JSON-RPC 2.0 response.
///
/// `id` is absent only for output the server sent without being asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version (always "2.0").
    pub jsonrpc: String,
    /// Request ID this is responding to.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Result (present on success).
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub result: Option<StructuredValue>,
    /// Error (present on failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: impl Into<RequestId>, result: StructuredValue) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns true if this is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Splits the reply into its result, turning an RPC error into
    /// [`ClientError::Server`] and a missing result into
    /// [`ClientError::UnexpectedResponse`].
    pub fn into_result(self) -> ClientResult<StructuredValue> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        match self.result {
            Some(result) => Ok(result),
            None => Err(ClientError::UnexpectedResponse(match self.id {
                Some(id) => format!("reply to request {id} has neither result nor error"),
                None => "reply has neither result nor error".to_owned(),
            })),
        }
    }
}

/// Any message a server may write to its stdout.
///
/// Variants are tried in order: anything carrying `method` is a
/// server-initiated message; everything else must be a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A server-to-client request.
    Request(JsonRpcRequest),
    /// A server-to-client notification.
    Notification(JsonRpcNotification),
    /// A reply to one of our requests, or unsolicited output without an id.
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Decodes one line of server output.
    pub fn from_slice(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new("tools/list", None, 1i64);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
    }

    #[test]
    fn test_notification_has_no_id() {
        let notif = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&notif).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    }

    #[test]
    fn response_accepts_int_and_string_ids() {
        let int: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).unwrap();
        assert_eq!(int.id, Some(RequestId::Number(7)));

        let string: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"7","result":{}}"#).unwrap();
        assert_eq!(string.id, Some(RequestId::String("7".into())));
        assert_ne!(int.id, string.id);
    }

    #[test]
    fn response_rejects_other_id_types() {
        for line in [
            r#"{"jsonrpc":"2.0","id":true,"result":{}}"#,
            r#"{"jsonrpc":"2.0","id":1.5,"result":{}}"#,
            r#"{"jsonrpc":"2.0","id":[1],"result":{}}"#,
        ] {
            assert!(serde_json::from_str::<JsonRpcResponse>(line).is_err(), "{line}");
        }
    }

    #[test]
    fn response_without_id_decodes() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":{"ok":true}}"#).unwrap();
        assert!(resp.id.is_none());
    }

    #[test]
    fn null_result_is_present() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), StructuredValue::Null);
    }

    #[test]
    fn error_requires_code_and_message() {
        assert!(
            serde_json::from_str::<JsonRpcResponse>(
                r#"{"jsonrpc":"2.0","id":1,"error":{"message":"x"}}"#
            )
            .is_err()
        );

        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"bad","data":[1,"two"]}}"#,
        )
        .unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(
            err,
            ClientError::server(
                -32000,
                "bad",
                Some(StructuredValue::Array(vec![1i64.into(), "two".into()]))
            )
        );
    }

    #[test]
    fn missing_result_is_unexpected() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":3}"#).unwrap();
        assert!(matches!(
            resp.into_result(),
            Err(ClientError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn message_classification() {
        let request = JsonRpcMessage::from_slice(br#"{"jsonrpc":"2.0","id":9,"method":"roots/list"}"#)
            .unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(_)));

        let notification = JsonRpcMessage::from_slice(
            br#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        )
        .unwrap();
        assert!(matches!(notification, JsonRpcMessage::Notification(_)));

        let response =
            JsonRpcMessage::from_slice(br#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#)
                .unwrap();
        assert!(matches!(response, JsonRpcMessage::Response(_)));

        assert!(JsonRpcMessage::from_slice(br#"{"hello":"world"}"#).is_err());
    }

    #[test]
    fn request_id_type_survives_encoding() {
        for id in [RequestId::Number(42), RequestId::String("abc".into())] {
            let req = JsonRpcRequest::new("ping", None, id.clone());
            let bytes = serde_json::to_vec(&req).unwrap();
            let decoded: JsonRpcResponse = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(decoded.id, Some(id));
        }
    }
}
