//! Error types for client operations.

use crate::value::StructuredValue;

/// Result alias used throughout toolwire.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to the caller of a client or transport operation.
///
/// Malformed inbound lines and unsolicited server messages never show up here;
/// the transport logs and drops them so the stream keeps flowing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The operation needs a running transport and there is none.
    #[error("not connected to an MCP server")]
    NotConnected,

    /// Spawning the server or writing to its stdin failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A local value could not be serialized.
    #[error("failed to encode message: {0}")]
    Encoding(String),

    /// A payload could not be deserialized into the expected shape.
    #[error("failed to decode message: {0}")]
    Decoding(String),

    /// The server answered with a well-formed JSON-RPC error.
    #[error("server error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Human readable message.
        message: String,
        /// Optional structured detail.
        data: Option<StructuredValue>,
    },

    /// A success reply lacked a field the operation requires.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The server process exited while the request was in flight.
    #[error("{}", describe_termination(.exit_code, .stderr))]
    ProcessTerminated {
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Trimmed tail of the process's stderr, if it wrote any.
        stderr: Option<String>,
    },
}

impl ClientError {
    /// Builds a [`ClientError::Server`] from the parts of a JSON-RPC error object.
    #[must_use]
    pub fn server(code: i64, message: impl Into<String>, data: Option<StructuredValue>) -> Self {
        Self::Server {
            code,
            message: message.into(),
            data,
        }
    }

    /// Returns true if retrying via a fresh connect could help.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionFailed(_) | Self::ProcessTerminated { .. }
        )
    }
}

fn describe_termination(exit_code: &Option<i32>, stderr: &Option<String>) -> String {
    let status = match exit_code {
        Some(code) => format!("server process exited with code {code}"),
        None => "server process was terminated by a signal".to_owned(),
    };
    format!("{status}: {}", stderr.as_deref().unwrap_or("no detail"))
}
