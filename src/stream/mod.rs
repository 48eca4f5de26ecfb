//! Decoding of streamed chat completions.
//!
//! [`decoder`] turns the completion API's `data: ...` stream into tokens,
//! [`event_source`] frames those chunks on the relay's own push channel.

pub mod decoder;
pub mod event_source;

pub use decoder::{decode, Decoded, DecodedToken, StreamDecoder};
pub use event_source::{encode_frame, EventSourceParser, PushEvent};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Incremental bytes to text conversion. Multi-byte sequences split across
/// reads are held back until the rest arrives.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    carry: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.carry;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix decodes
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            tracing::warn!("Replacing {} invalid UTF-8 byte(s) in stream", len);
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        self.carry = rest.to_vec();
        out
    }

    /// Number of bytes waiting for the remainder of a character.
    pub fn held(&self) -> usize {
        self.carry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_multibyte_char_is_reassembled() {
        let bytes = "héllo".as_bytes();
        let mut carry = Utf8Carry::new();

        assert_eq!(carry.push(&bytes[..2]), "h");
        assert_eq!(carry.held(), 1);
        assert_eq!(carry.push(&bytes[2..]), "éllo");
        assert_eq!(carry.held(), 0);
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
        assert_eq!(carry.held(), 0);
    }
}
