use tracing::debug;

use crate::llm::models::DeltaChunk;
use crate::stream::StreamError;

/// Prefix of every event in the completion stream.
pub const EVENT_DELIMITER: &str = "data: ";
/// Payload marking the end of one completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const EVENT_TERMINATOR: &str = "\n\n";
const CRLF_TERMINATOR: &str = "\r\n\r\n";
// closing shape of a delta payload ending in its choices array
const DELTA_CLOSING: &str = "}]}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedToken {
    Content(String),
    Done,
}

/// Result of decoding one chunk: the tokens it completed, in stream order,
/// and the unconsumed tail to prepend to the next chunk.
#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    pub tokens: Vec<Result<DecodedToken, StreamError>>,
    pub pending: String,
}

impl Decoded {
    /// Tokens without the errors, mostly useful in tests.
    pub fn ok_tokens(&self) -> Vec<DecodedToken> {
        self.tokens
            .iter()
            .filter_map(|token| token.as_ref().ok().cloned())
            .collect()
    }
}

/// Decodes `chunk` against the `pending` fragment left by the previous call.
///
/// The fragment is kept with its leading `data: ` so an event split across
/// chunk boundaries (even inside the delimiter itself) is rebuilt intact.
pub fn decode(chunk: &str, pending: &str) -> Decoded {
    let mut combined = String::with_capacity(pending.len() + chunk.len());
    combined.push_str(pending);
    combined.push_str(chunk);

    let starts = event_starts(&combined, pending.len());
    if starts.is_empty() {
        return Decoded {
            tokens: Vec::new(),
            pending: combined,
        };
    }

    let mut decoded = Decoded::default();

    // text before the first event start is the tail of an earlier line
    for (index, &start) in starts.iter().enumerate() {
        let end = starts.get(index + 1).copied().unwrap_or(combined.len());
        let raw = &combined[start + EVENT_DELIMITER.len()..end];
        let is_last = index + 1 == starts.len();
        let terminated = raw.ends_with(EVENT_TERMINATOR) || raw.ends_with(CRLF_TERMINATOR);
        let segment = raw.trim_end_matches(['\r', '\n']);

        if segment == DONE_SENTINEL {
            decoded.tokens.push(Ok(DecodedToken::Done));
        } else if segment.ends_with(DELTA_CLOSING) {
            match parse_delta(segment) {
                Ok(Some(content)) => decoded.tokens.push(Ok(DecodedToken::Content(content))),
                Ok(None) => {}
                // a string value ending in "}]}" can fake the closing shape
                Err(_) if is_last && !terminated => {
                    decoded.pending = carry(raw);
                }
                Err(_) if !terminated => {
                    debug!("Dropping unterminated stream fragment: {:?}", segment);
                }
                Err(e) => decoded.tokens.push(Err(e)),
            }
        } else if is_last {
            decoded.pending = carry(raw);
        } else {
            debug!("Dropping unrecognised stream event: {:?}", segment);
        }
    }

    decoded
}

/// Byte offsets of every `data: ` that opens an event.
///
/// Only a delimiter at a line start counts, so content mentioning `data: `
/// stays inside its event. The one exception is a delimiter right at
/// `chunk_start`: a carried fragment never ends with a newline, so a new
/// event there is accepted unless the fragment and the rest of the line
/// already form one complete event.
fn event_starts(combined: &str, chunk_start: usize) -> Vec<usize> {
    let bytes = combined.as_bytes();
    let mut starts: Vec<usize> = Vec::new();

    for (pos, _) in combined.match_indices(EVENT_DELIMITER) {
        let line_start = pos == 0 || bytes[pos - 1] == b'\n';
        if line_start
            || (pos == chunk_start && !continues_event(combined, starts.last().copied(), pos))
        {
            starts.push(pos);
        }
    }
    starts
}

// Whether the `data: ` at `pos` is text inside the event opened at `open`.
fn continues_event(combined: &str, open: Option<usize>, pos: usize) -> bool {
    let Some(open) = open else {
        return false;
    };
    let body_start = open + EVENT_DELIMITER.len();
    if combined[body_start..pos].contains('\n') {
        return false;
    }
    let Some(line_len) = combined[pos..].find('\n') else {
        // line not complete yet, keep it whole
        return true;
    };
    let line = combined[body_start..pos + line_len].trim_end_matches('\r');
    line == DONE_SENTINEL || serde_json::from_str::<DeltaChunk>(line).is_ok()
}

fn carry(raw: &str) -> String {
    format!("{}{}", EVENT_DELIMITER, raw)
}

fn parse_delta(segment: &str) -> Result<Option<String>, StreamError> {
    let chunk: DeltaChunk = serde_json::from_str(segment)
        .map_err(|e| StreamError::MalformedEvent(format!("{}: {}", e, segment)))?;

    if chunk.choices.is_empty() {
        return Err(StreamError::MalformedEvent(
            "delta chunk has no choices".to_string(),
        ));
    }

    Ok(chunk.content().map(str::to_string))
}

/// [`decode`] with the pending fragment owned across calls.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Result<DecodedToken, StreamError>> {
        let Decoded { tokens, pending } = decode(chunk, &self.pending);
        self.pending = pending;
        tokens
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
