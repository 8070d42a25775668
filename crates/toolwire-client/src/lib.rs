//! MCP client for servers that run as child processes.
//!
//! [`Client::connect`] spawns the server, performs the `initialize` handshake
//! and keeps the negotiated [`ClientSession`]. After that the client can list
//! tools, prompts and resources, and call tools. Every operation returns a
//! [`ClientResult`](toolwire_core::ClientResult).

#![forbid(unsafe_code)]

mod client;
mod session;

pub use client::{Client, ClientConfig, ConnectionState};
pub use session::ClientSession;

pub use toolwire_core::{ClientError, ClientResult, StructuredValue};
pub use toolwire_protocol::{CallToolResult, Content, Prompt, Resource, Tool};
pub use toolwire_transport::{ServerLaunch, TrafficEvent, TrafficObserver, TransportState};
