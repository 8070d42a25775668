//! Message codec for framing JSON-RPC messages.
//!
//! MCP over stdio uses newline-delimited JSON (NDJSON). Each complete line is
//! decoded on its own; a line that fails to decode yields an error for that
//! line only and framing continues with the next one.

use serde::Serialize;
use toolwire_protocol::JsonRpcMessage;

/// Default cap on a single line (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Threshold for compacting the buffer (bytes already consumed).
const COMPACT_THRESHOLD: usize = 4096;

/// Longest excerpt of a bad line kept in a [`CodecError`].
const LINE_EXCERPT: usize = 512;

/// Line framing plus JSON encoding/decoding.
#[derive(Debug)]
pub struct Codec {
    /// Buffer for incomplete lines.
    buffer: Vec<u8>,
    /// Data before this offset has been consumed.
    read_pos: usize,
    /// No newline exists in `buffer[read_pos..scan_pos]`.
    scan_pos: usize,
    /// Set after an oversized partial line was discarded; the remainder of
    /// that line is skipped up to its newline.
    discarding: bool,
    /// Maximum allowed line size in bytes.
    max_message_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Creates a new codec with the default 10 MiB line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Creates a codec with a custom line limit.
    #[must_use]
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            read_pos: 0,
            scan_pos: 0,
            discarding: false,
            max_message_size,
        }
    }

    /// Returns the maximum allowed line size in bytes.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Number of buffered bytes not yet framed into a line.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Returns true when no partial line is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffered_len() == 0
    }

    /// Encodes a message as one newline-terminated line.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        let mut bytes = serde_json::to_vec(message).map_err(CodecError::Encode)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Appends `data` and decodes every line it completes.
    ///
    /// Incomplete data stays buffered for the next call. Empty lines are
    /// skipped. Each returned item corresponds to one non-empty line, or to a
    /// partial line discarded for exceeding the size limit.
    pub fn decode(&mut self, data: &[u8]) -> Vec<Result<JsonRpcMessage, CodecError>> {
        if self.read_pos >= COMPACT_THRESHOLD {
            self.buffer.drain(..self.read_pos);
            self.scan_pos -= self.read_pos;
            self.read_pos = 0;
        }

        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        let mut start = self.read_pos;
        let mut search_from = self.scan_pos.max(start);

        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let line_start = start;
            start = end + 1;
            search_from = start;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let line = self.buffer[line_start..end].trim_ascii();
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_message_size {
                messages.push(Err(CodecError::MessageTooLarge(line.len())));
                continue;
            }

            messages.push(JsonRpcMessage::from_slice(line).map_err(|source| CodecError::Json {
                line: excerpt(line),
                source,
            }));
        }

        self.read_pos = start;
        self.scan_pos = self.buffer.len();

        let remaining = self.buffered_len();
        if remaining > self.max_message_size {
            messages.push(Err(CodecError::MessageTooLarge(remaining)));
            self.clear();
            self.discarding = true;
        }

        messages
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.scan_pos = 0;
        self.discarding = false;
    }
}

fn excerpt(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    if text.chars().count() <= LINE_EXCERPT {
        text.into_owned()
    } else {
        let mut cut: String = text.chars().take(LINE_EXCERPT).collect();
        cut.push_str("...");
        cut
    }
}

/// Codec error types.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A complete line was not a valid JSON-RPC message.
    #[error("invalid JSON-RPC line {line:?}: {source}")]
    Json {
        /// The offending line (possibly truncated).
        line: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// A line exceeded the size limit and was discarded.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),
    /// An outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}
