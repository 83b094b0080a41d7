//! UTF-8 text decoding for the receive path

use tracing::warn;

/// Decode a complete byte run as UTF-8.
///
/// Returns `None` when the bytes are not valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// Streaming UTF-8 decoder
///
/// A multi-byte character split across two chunks is held back until the
/// rest of it arrives. Bytes that can never start a valid character are
/// dropped with a warning.
#[derive(Debug, Clone, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, returning the text completed by this chunk
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut text = String::new();
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        text.push_str(valid);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            warn!(dropped = bad, "Dropping invalid UTF-8 sequence");
                            rest = &tail[bad..];
                        }
                        None => {
                            // Incomplete character at the end of the chunk
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Bytes held back waiting for the rest of a character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
