//! Client session state.

use toolwire_protocol::{
    ClientCapabilities, ClientInfo, InitializeResult, ServerCapabilities, ServerInfo,
};

/// What both sides agreed on during the `initialize` handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    /// Client info sent during initialization.
    client_info: ClientInfo,
    /// Client capabilities sent during initialization.
    client_capabilities: ClientCapabilities,
    /// Server info received during initialization.
    server_info: ServerInfo,
    /// Server capabilities received during initialization.
    server_capabilities: ServerCapabilities,
    /// Negotiated protocol version.
    protocol_version: String,
    /// Usage hints the server offered.
    instructions: Option<String>,
}

impl ClientSession {
    /// Creates a session from what was sent and the server's handshake reply.
    #[must_use]
    pub fn new(
        client_info: ClientInfo,
        client_capabilities: ClientCapabilities,
        result: InitializeResult,
    ) -> Self {
        Self {
            client_info,
            client_capabilities,
            server_info: result.server_info,
            server_capabilities: result.capabilities,
            protocol_version: result.protocol_version,
            instructions: result.instructions,
        }
    }

    /// Returns the client info.
    #[must_use]
    pub fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    /// Returns the client capabilities.
    #[must_use]
    pub fn client_capabilities(&self) -> &ClientCapabilities {
        &self.client_capabilities
    }

    /// Returns the server info.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn server_capabilities(&self) -> &ServerCapabilities {
        &self.server_capabilities
    }

    /// Returns the protocol version the server answered with.
    #[must_use]
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Returns the server's instructions, if any.
    #[must_use]
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }
}
