//! Framing of the relay's push channel.
//!
//! Every upstream chunk travels as one `text/event-stream` frame. Chunks hold
//! blank lines of their own, so each line becomes a separate `data:` field
//! and the parser joins them back with `\n`.

use crate::stream::Utf8Carry;

pub const MESSAGE_EVENT: &str = "message";
pub const ERROR_EVENT: &str = "error";
pub const PING_EVENT: &str = "ping";
pub const NOTICE_EVENT: &str = "notice";
/// Sent once the upstream response for a stream is over, `[DONE]` or not.
pub const END_EVENT: &str = "end";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

impl PushEvent {
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or(MESSAGE_EVENT)
    }
}

pub fn encode_frame(event: Option<&str>, id: Option<&str>, data: &str) -> String {
    let mut frame = String::with_capacity(data.len() + 32);
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    if let Some(id) = id {
        frame.push_str("id: ");
        frame.push_str(id);
        frame.push('\n');
    }
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Incremental parser for the push channel.
#[derive(Debug, Default)]
pub struct EventSourceParser {
    utf8: Utf8Carry,
    buffer: String,
}

impl EventSourceParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<PushEvent> {
        let text = self.utf8.push(bytes);
        self.feed_str(&text)
    }

    pub fn feed_str(&mut self, text: &str) -> Vec<PushEvent> {
        self.buffer.push_str(text);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<PushEvent> {
    let mut event = PushEvent::default();
    let mut data_lines = Vec::new();

    for line in block.split('\n') {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}
