//! Bounded tail of a server's diagnostic stream.

/// Characters of stderr retained per connection.
pub const DEFAULT_STDERR_CAPACITY: usize = 10_000;

/// Keeps the most recent `capacity` characters written to stderr.
///
/// Bytes are decoded as UTF-8 across chunk boundaries; a multi-byte sequence
/// split between two reads is held back until its remainder arrives. Invalid
/// sequences become U+FFFD.
#[derive(Debug)]
pub struct StderrTail {
    text: String,
    chars: usize,
    capacity: usize,
    incomplete: Vec<u8>,
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_CAPACITY)
    }
}

impl StderrTail {
    /// Creates an empty tail holding at most `capacity` characters.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            capacity,
            incomplete: Vec::new(),
        }
    }

    /// Appends a raw chunk and returns the text it decoded to.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.incomplete.extend_from_slice(chunk);
        let mut decoded = String::new();

        loop {
            match std::str::from_utf8(&self.incomplete) {
                Ok(text) => {
                    decoded.push_str(text);
                    self.incomplete.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.incomplete[..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.incomplete.drain(..valid + bad);
                        }
                        None => {
                            self.incomplete.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        self.push_str(&decoded);
        decoded
    }

    /// Flushes a trailing incomplete sequence as U+FFFD. Called when the
    /// stream reaches EOF.
    pub fn finish(&mut self) {
        if !self.incomplete.is_empty() {
            self.incomplete.clear();
            self.push_str("\u{FFFD}");
        }
    }

    /// Appends already-decoded text.
    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
        self.chars += text.chars().count();

        if self.chars > self.capacity {
            let excess = self.chars - self.capacity;
            let cut = self
                .text
                .char_indices()
                .nth(excess)
                .map_or(self.text.len(), |(index, _)| index);
            self.text.drain(..cut);
            self.chars = self.capacity;
        }
    }

    /// The retained text with surrounding whitespace trimmed, or `None` when
    /// nothing but whitespace was written.
    #[must_use]
    pub fn tail(&self) -> Option<String> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }

    /// Number of retained characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.chars
    }

    /// Returns true when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chars == 0 && self.incomplete.is_empty()
    }

    /// Maximum retained characters.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops everything retained.
    pub fn clear(&mut self) {
        self.text.clear();
        self.chars = 0;
        self.incomplete.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_characters() {
        let mut tail = StderrTail::default();
        tail.push(&vec![b'a'; 6_000]);
        tail.push(&vec![b'b'; 6_000]);

        let text = tail.tail().unwrap();
        assert_eq!(tail.char_len(), DEFAULT_STDERR_CAPACITY);
        assert_eq!(text.len(), 10_000);
        assert!(text.starts_with(&"a".repeat(4_000)));
        assert!(text.ends_with(&"b".repeat(6_000)));
        assert!(!text.contains(&"a".repeat(4_001)));
    }

    #[test]
    fn capacity_counts_characters_not_bytes() {
        let mut tail = StderrTail::new(3);
        tail.push("héllo".as_bytes());
        assert_eq!(tail.tail().as_deref(), Some("llo"));

        tail.push("ééé".as_bytes());
        assert_eq!(tail.tail().as_deref(), Some("ééé"));
    }

    #[test]
    fn split_multibyte_sequence_is_reassembled() {
        let mut tail = StderrTail::default();
        let bytes = "é".as_bytes();
        assert_eq!(tail.push(&bytes[..1]), "");
        assert_eq!(tail.push(&bytes[1..]), "é");
        assert_eq!(tail.tail().as_deref(), Some("é"));
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut tail = StderrTail::default();
        let decoded = tail.push(b"ok\xffdone");
        assert_eq!(decoded, "ok\u{FFFD}done");
    }

    #[test]
    fn finish_flushes_a_truncated_sequence() {
        let mut tail = StderrTail::default();
        tail.push(b"panic: ");
        tail.push(&"é".as_bytes()[..1]);
        assert_eq!(tail.tail().as_deref(), Some("panic:"));

        tail.finish();
        assert_eq!(tail.tail().as_deref(), Some("panic: \u{FFFD}"));
        assert_eq!(tail.char_len(), 8);

        tail.finish();
        assert_eq!(tail.char_len(), 8);
    }

    #[test]
    fn whitespace_only_is_absent() {
        let mut tail = StderrTail::default();
        assert!(tail.tail().is_none());
        tail.push(b"  \n\t\n");
        assert!(tail.tail().is_none());
        tail.push(b"boom\n");
        assert_eq!(tail.tail().as_deref(), Some("boom"));
    }

    #[test]
    fn clear_empties_everything() {
        let mut tail = StderrTail::default();
        tail.push(b"warning\n");
        tail.push(&"é".as_bytes()[..1]);
        tail.clear();
        assert!(tail.is_empty());
        assert!(tail.tail().is_none());
    }
}
