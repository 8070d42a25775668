//! Structured logging for toolwire.
//!
//! All toolwire crates log through the standard [`log`] facade and never
//! install a logger themselves. Applications pick a backend:
//!
//! ```ignore
//! env_logger::init();
//! ```
//!
//! # Log Levels
//!
//! - **error**: the server connection is unusable
//! - **warn**: dropped input (malformed lines, responses for unknown ids)
//! - **info**: connection lifecycle (spawn, handshake, exit, stop)
//! - **debug**: request/response flow, unsolicited server messages
//! - **trace**: raw wire bytes and stderr chunks
//!
//! # Log Targets
//!
//! - `toolwire`: root target
//! - `toolwire::transport`: subprocess lifecycle and correlation
//! - `toolwire::codec`: line framing and JSON decoding
//! - `toolwire::client`: handshake and typed operations
//! - `toolwire::traffic`: per-message wire traffic
//!
//! Example filter: `RUST_LOG=toolwire::transport=debug,toolwire::traffic=trace`

pub use log::{debug, error, info, trace, warn};

pub use log::{Level, LevelFilter};

/// Log targets used by toolwire components.
pub mod targets {
    /// Root target for all toolwire logs.
    pub const TOOLWIRE: &str = "toolwire";

    /// Subprocess lifecycle, pending table and correlation.
    pub const TRANSPORT: &str = "toolwire::transport";

    /// Line framing and JSON decoding.
    pub const CODEC: &str = "toolwire::codec";

    /// Handshake and typed client operations.
    pub const CLIENT: &str = "toolwire::client";

    /// Individual wire messages and stderr chunks.
    pub const TRAFFIC: &str = "toolwire::traffic";
}

/// Returns whether logging is enabled at the given level for the given target.
///
/// Use it to skip formatting large payloads that would be discarded:
///
/// ```ignore
/// if is_enabled(Level::Trace, targets::TRAFFIC) {
///     trace!(target: targets::TRAFFIC, "-> {}", params.to_pretty_string());
/// }
/// ```
#[inline]
#[must_use]
pub fn is_enabled(level: Level, target: &str) -> bool {
    log::log_enabled!(target: target, level)
}

/// Logs a transport event at DEBUG level.
#[macro_export]
macro_rules! log_transport {
    ($($arg:tt)*) => {
        log::debug!(target: "toolwire::transport", $($arg)*)
    };
}

/// Logs a client event at DEBUG level.
#[macro_export]
macro_rules! log_client {
    ($($arg:tt)*) => {
        log::debug!(target: "toolwire::client", $($arg)*)
    };
}
