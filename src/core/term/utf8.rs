//! Streaming UTF-8 decoding
//!
//! Process output arrives in arbitrary chunks, so a multi-byte character can
//! be split across two reads. The decoder holds the incomplete tail until the
//! next chunk arrives and only substitutes U+FFFD for bytes that can never
//! form a valid character.

/// Replacement for invalid byte sequences
pub const REPLACEMENT: char = '\u{FFFD}';

/// UTF-8 decoder with carry-over between chunks
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    /// Incomplete trailing sequence from the previous chunk (at most 3 bytes)
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if decoder is in the middle of a sequence
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Decode a chunk, returning all complete characters
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input;
        let mut rest: &[u8] = if self.pending.is_empty() {
            bytes
        } else {
            input = std::mem::take(&mut self.pending);
            input.extend_from_slice(bytes);
            &input
        };

        let mut out = String::with_capacity(rest.len());
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // `valid_up_to` marks a verified prefix
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated sequence at the end of the chunk
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence as a replacement char
    pub fn finish(&mut self) -> Option<char> {
        if self.pending.is_empty() {
            None
        } else {
            self.pending.clear();
            Some(REPLACEMENT)
        }
    }
}
