//! Subprocess stdio transport for toolwire.
//!
//! - [`Codec`]: newline-delimited JSON framing with per-line decode results
//! - [`StderrTail`]: bounded buffer of the server's diagnostic output
//! - [`ServerLaunch`]: how to start a server process
//! - [`SubprocessTransport`]: request/response correlation over a child's pipes
//! - [`TrafficEvent`] / [`TrafficObserver`]: tap on everything on the wire

#![forbid(unsafe_code)]

mod codec;
mod launch;
mod stderr;
mod subprocess;
mod traffic;

pub use codec::{Codec, CodecError, DEFAULT_MAX_MESSAGE_SIZE};
pub use launch::{FALLBACK_SHELL, ServerLaunch};
pub use stderr::{DEFAULT_STDERR_CAPACITY, StderrTail};
pub use subprocess::{EXIT_GRACE, SubprocessTransport, TransportState};
pub use traffic::{Direction, TrafficEvent, TrafficObserver};
