//! MCP protocol types and JSON-RPC implementation.
//!
//! This crate provides:
//! - JSON-RPC 2.0 envelopes (request, notification, response, error)
//! - MCP payload types for the handshake, tools, prompts and resources
//! - [`RequestBuilder`], the per-session id generator
//!
//! # Wire Format
//!
//! All messages are newline-delimited JSON (NDJSON); framing lives in
//! `toolwire-transport`.

#![forbid(unsafe_code)]

mod builder;
mod jsonrpc;
mod messages;
mod types;

pub use builder::RequestBuilder;
pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};
pub use messages::*;
pub use types::*;
