//! Wire traffic observation.

use std::fmt;
use std::sync::Arc;

use toolwire_protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// One unit of traffic between client and server.
#[derive(Debug, Clone, PartialEq)]
pub enum TrafficEvent {
    /// A request written to the server.
    Request(JsonRpcRequest),
    /// A notification written to the server.
    Notification(JsonRpcNotification),
    /// A response read from the server, whether or not anyone awaited it.
    Response(JsonRpcResponse),
    /// One stderr chunk as it arrived, decoded lossily on its own.
    Stderr(String),
}

/// Which way a [`TrafficEvent`] travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Outbound,
    /// Server to client.
    Inbound,
}

impl TrafficEvent {
    /// Direction of travel.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            TrafficEvent::Request(_) | TrafficEvent::Notification(_) => Direction::Outbound,
            TrafficEvent::Response(_) | TrafficEvent::Stderr(_) => Direction::Inbound,
        }
    }
}

impl fmt::Display for TrafficEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficEvent::Request(request) => {
                write!(f, "-> {} id={}", request.method, request.id)
            }
            TrafficEvent::Notification(notification) => write!(f, "-> {}", notification.method),
            TrafficEvent::Response(response) => {
                let status = if response.is_error() { "ERR" } else { "OK" };
                match &response.id {
                    Some(id) => write!(f, "<- {status} id={id}"),
                    None => write!(f, "<- {status} (no id)"),
                }
            }
            TrafficEvent::Stderr(text) => write!(f, "!! {}", text.trim_end()),
        }
    }
}

/// Callback receiving every [`TrafficEvent`] of a transport.
///
/// Invoked on the transport's worker task; keep it quick.
pub type TrafficObserver = Arc<dyn Fn(&TrafficEvent) + Send + Sync>;
