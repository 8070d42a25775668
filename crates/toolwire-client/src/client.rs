//! The MCP client.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use serde::de::DeserializeOwned;
use toolwire_core::logging::targets;
use toolwire_core::{ClientError, ClientResult, StructuredValue, log_client};
use toolwire_protocol::{
    CallToolResult, ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PROTOCOL_VERSION, Page, Prompt, RequestBuilder, Resource, Tool,
};
use toolwire_transport::{ServerLaunch, SubprocessTransport, TrafficObserver, TransportState};

use crate::session::ClientSession;

/// What the client announces during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Name and version sent as `clientInfo`.
    pub client_info: ClientInfo,
    /// Capabilities sent to the server.
    pub capabilities: ClientCapabilities,
    /// Protocol version requested.
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            capabilities: ClientCapabilities::default(),
            protocol_version: PROTOCOL_VERSION.to_owned(),
        }
    }
}

/// Connection lifecycle of a [`Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No server attached.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake completed.
    Connected,
    /// The last connection attempt failed.
    Failed(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

type ListRequest = fn(&RequestBuilder, Option<String>) -> ClientResult<JsonRpcRequest>;

/// An MCP client talking to one server subprocess at a time.
///
/// Operations take `&self` and may run concurrently; connecting and
/// disconnecting take `&mut self`.
///
/// ```ignore
/// let mut client = Client::new(ClientConfig::default());
/// client.connect(ServerLaunch::new("npx").args(["-y", "@modelcontextprotocol/server-everything"])).await?;
/// for tool in client.list_tools().await? {
///     println!("{}", tool.name);
/// }
/// client.disconnect().await;
/// ```
pub struct Client {
    config: ClientConfig,
    observer: Option<TrafficObserver>,
    state: ConnectionState,
    session: Option<ClientSession>,
    transport: Option<SubprocessTransport>,
    requests: RequestBuilder,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("session", &self.session)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            observer: None,
            state: ConnectionState::Disconnected,
            session: None,
            transport: None,
            requests: RequestBuilder::new(),
        }
    }

    /// Reports the traffic of every future connection to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: TrafficObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The handshake configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Returns true after a successful handshake while the server still runs.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self
                .transport
                .as_ref()
                .is_some_and(SubprocessTransport::is_running)
    }

    /// The session negotiated by the last successful [`connect`](Self::connect).
    #[must_use]
    pub fn session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    /// State of the underlying process, if one was started.
    #[must_use]
    pub fn transport_state(&self) -> Option<TransportState> {
        self.transport.as_ref().map(SubprocessTransport::state)
    }

    /// Starts the server and performs the `initialize` handshake.
    ///
    /// A client that is already connected disconnects first; request ids
    /// restart at 1 for every new session. On failure the process is stopped,
    /// the state becomes [`ConnectionState::Failed`] and no session is kept.
    pub async fn connect(&mut self, launch: ServerLaunch) -> ClientResult<&ClientSession> {
        if self.transport.is_some() {
            info!(target: targets::CLIENT, "reconnecting; closing the current session first");
            self.disconnect().await;
        }

        self.state = ConnectionState::Connecting;
        self.session = None;
        self.requests = RequestBuilder::new();

        let mut transport = SubprocessTransport::new(launch);
        if let Some(observer) = &self.observer {
            transport = transport.with_observer(Arc::clone(observer));
        }

        match self.handshake(&transport).await {
            Ok(session) => {
                info!(
                    target: targets::CLIENT,
                    "connected to {} {} (protocol {})",
                    session.server_info().name,
                    session.server_info().version.as_deref().unwrap_or("(unversioned)"),
                    session.protocol_version()
                );
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
                Ok(self.session.insert(session))
            }
            Err(err) => {
                warn!(target: targets::CLIENT, "connection failed: {err}");
                transport.stop().await;
                self.state = ConnectionState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    async fn handshake(&self, transport: &SubprocessTransport) -> ClientResult<ClientSession> {
        transport.start()?;

        let params = InitializeParams {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.config.capabilities.clone(),
            client_info: self.config.client_info.clone(),
        };
        let request = self.requests.initialize(&params)?;
        log_client!("initialize id={}", request.id);
        let result: InitializeResult = decode_result(transport.send(request).await?)?;

        if result.protocol_version != params.protocol_version {
            info!(
                target: targets::CLIENT,
                "server answered with protocol {} (requested {})",
                result.protocol_version,
                params.protocol_version
            );
        }

        transport.send_notification(self.requests.initialized()).await?;
        Ok(ClientSession::new(
            params.client_info,
            params.capabilities,
            result,
        ))
    }

    /// Stops the server and forgets the session. Always succeeds.
    pub async fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.stop().await;
            log_client!("disconnected");
        }
        self.session = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Lists every tool, following pagination cursors.
    pub async fn list_tools(&self) -> ClientResult<Vec<Tool>> {
        self.list_all::<ListToolsResult>(RequestBuilder::list_tools)
            .await
    }

    /// Fetches one page of tools.
    pub async fn list_tools_page(&self, cursor: Option<String>) -> ClientResult<ListToolsResult> {
        self.call(|requests| requests.list_tools(cursor)).await
    }

    /// Lists every prompt, following pagination cursors.
    pub async fn list_prompts(&self) -> ClientResult<Vec<Prompt>> {
        self.list_all::<ListPromptsResult>(RequestBuilder::list_prompts)
            .await
    }

    /// Fetches one page of prompts.
    pub async fn list_prompts_page(
        &self,
        cursor: Option<String>,
    ) -> ClientResult<ListPromptsResult> {
        self.call(|requests| requests.list_prompts(cursor)).await
    }

    /// Lists every resource, following pagination cursors.
    pub async fn list_resources(&self) -> ClientResult<Vec<Resource>> {
        self.list_all::<ListResourcesResult>(RequestBuilder::list_resources)
            .await
    }

    /// Fetches one page of resources.
    pub async fn list_resources_page(
        &self,
        cursor: Option<String>,
    ) -> ClientResult<ListResourcesResult> {
        self.call(|requests| requests.list_resources(cursor)).await
    }

    /// Invokes a tool.
    ///
    /// A tool that ran but reported failure comes back as `Ok` with
    /// [`CallToolResult::is_error`] set; only protocol-level failures are
    /// errors.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<StructuredValue>,
    ) -> ClientResult<CallToolResult> {
        self.call(|requests| requests.call_tool(name, arguments))
            .await
    }

    async fn list_all<P>(&self, build: ListRequest) -> ClientResult<Vec<P::Item>>
    where
        P: Page + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let current = cursor.take();
            let page: P = self.call(move |requests| build(requests, current)).await?;
            let (batch, next) = page.into_parts();
            items.extend(batch);

            let Some(next) = next else {
                return Ok(items);
            };
            if !seen.insert(next.clone()) {
                return Err(ClientError::UnexpectedResponse(format!(
                    "server repeated pagination cursor {next:?}"
                )));
            }
            cursor = Some(next);
        }
    }

    /// Builds, sends and decodes one request. Nothing is built (and no id is
    /// used) unless connected.
    async fn call<T: DeserializeOwned>(
        &self,
        build: impl FnOnce(&RequestBuilder) -> ClientResult<JsonRpcRequest>,
    ) -> ClientResult<T> {
        let transport = match (&self.state, &self.transport) {
            (ConnectionState::Connected, Some(transport)) => transport,
            _ => return Err(ClientError::NotConnected),
        };
        let request = build(&self.requests)?;
        log_client!("{} id={}", request.method, request.id);
        decode_result(transport.send(request).await?)
    }
}

/// Turns a response into the typed result: RPC errors become
/// [`ClientError::Server`], a missing result [`ClientError::UnexpectedResponse`],
/// a result of the wrong shape [`ClientError::Decoding`].
fn decode_result<T: DeserializeOwned>(response: JsonRpcResponse) -> ClientResult<T> {
    response.into_result()?.decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolwire_protocol::{JsonRpcError, RequestId};

    #[test]
    fn default_config_announces_toolwire() {
        let config = ClientConfig::default();
        assert_eq!(config.client_info.name, "toolwire");
        assert_eq!(config.protocol_version, "2024-11-05");
        assert_eq!(config.capabilities, ClientCapabilities::default());
    }

    #[test]
    fn new_client_is_disconnected() {
        let client = Client::default();
        assert_eq!(client.state(), &ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.session().is_none());
        assert!(client.transport_state().is_none());
    }

    #[tokio::test]
    async fn operations_require_a_connection() {
        let client = Client::default();
        assert_eq!(client.list_tools().await.unwrap_err(), ClientError::NotConnected);
        assert_eq!(
            client.call_tool("echo", None).await.unwrap_err(),
            ClientError::NotConnected
        );
        // No ids were spent while disconnected.
        assert_eq!(client.requests.peek_next_id(), 1);
    }

    #[test]
    fn decode_result_maps_each_failure() {
        let ok: ListToolsResult = decode_result(JsonRpcResponse::success(
            1i64,
            StructuredValue::parse(br#"{"tools":[{"name":"a"}]}"#).unwrap(),
        ))
        .unwrap();
        assert_eq!(ok.tools[0].name, "a");

        let rpc = decode_result::<ListToolsResult>(JsonRpcResponse::error(
            Some(RequestId::Number(1)),
            JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            },
        ));
        assert_eq!(
            rpc.unwrap_err(),
            ClientError::server(-32601, "Method not found", None)
        );

        let mut missing = JsonRpcResponse::success(1i64, StructuredValue::Null);
        missing.result = None;
        assert!(matches!(
            decode_result::<ListToolsResult>(missing),
            Err(ClientError::UnexpectedResponse(_))
        ));

        let wrong = decode_result::<ListToolsResult>(JsonRpcResponse::success(
            1i64,
            StructuredValue::parse(br#"{"tools":"nope"}"#).unwrap(),
        ));
        assert!(matches!(wrong, Err(ClientError::Decoding(_))));
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed("boom".into()).to_string(),
            "failed: boom"
        );
    }
}
