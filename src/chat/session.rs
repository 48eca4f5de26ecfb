use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::History;
use crate::llm::models::CompletionRequest;
use crate::stream::event_source::{END_EVENT, ERROR_EVENT, MESSAGE_EVENT};
use crate::stream::{DecodedToken, PushEvent, StreamDecoder, StreamError};

/// Lifecycle of the completion stream a session is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    /// Request sent, no chunk seen yet.
    Awaiting,
    Streaming,
    Complete,
    Errored(StreamError),
}

impl StreamState {
    pub fn in_flight(&self) -> bool {
        matches!(self, StreamState::Awaiting | StreamState::Streaming)
    }
}

/// What the UI receives per decoded token. `done` carries empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiMessage {
    pub done: bool,
    pub content: String,
}

/// A completion request the caller has to send for the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub stream_id: Uuid,
    pub request: CompletionRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Token(UiMessage),
    Failed { stream_id: Uuid, error: StreamError },
    Dispatch(Dispatch),
}

/// One conversation: history, decoder state and the response being
/// accumulated. Only one completion is in flight at a time; submissions made
/// meanwhile wait in a queue.
pub struct ChatSession {
    model: String,
    history: History,
    decoder: StreamDecoder,
    response: String,
    state: StreamState,
    active: Option<Uuid>,
    queue: VecDeque<String>,
}

impl ChatSession {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            history: History::new(system_prompt),
            decoder: StreamDecoder::new(),
            response: String::new(),
            state: StreamState::Idle,
            active: None,
            queue: VecDeque::new(),
        }
    }

    pub fn submit(&mut self, text: impl Into<String>) -> Option<Dispatch> {
        let text = text.into();
        if self.state.in_flight() {
            debug!("Stream in flight, queueing submission");
            self.queue.push_back(text);
            return None;
        }
        Some(self.start(text))
    }

    /// Dispatches the next queued submission if nothing is in flight, e.g.
    /// once the push channel is back after a lost connection.
    pub fn resume(&mut self) -> Option<Dispatch> {
        if self.state.in_flight() {
            return None;
        }
        let next = self.queue.pop_front()?;
        Some(self.start(next))
    }

    pub fn on_chunk(&mut self, stream_id: Uuid, chunk: &str) -> Vec<SessionEvent> {
        if self.active_stream() != Some(stream_id) {
            debug!("Ignoring chunk for stream {}", stream_id);
            return Vec::new();
        }

        self.state = StreamState::Streaming;
        let mut events = Vec::new();

        for token in self.decoder.feed(chunk) {
            match token {
                Ok(DecodedToken::Content(text)) => {
                    self.response.push_str(&text);
                    events.push(SessionEvent::Token(UiMessage {
                        done: false,
                        content: text,
                    }));
                }
                Ok(DecodedToken::Done) => {
                    let response = std::mem::take(&mut self.response);
                    info!("Stream {} complete ({} chars)", stream_id, response.len());
                    self.history.append_assistant(response);
                    self.decoder.reset();
                    self.state = StreamState::Complete;
                    events.push(SessionEvent::Token(UiMessage {
                        done: true,
                        content: String::new(),
                    }));
                    // anything after [DONE] belongs to no stream of ours
                    break;
                }
                Err(error) => {
                    self.fail(error, &mut events);
                    break;
                }
            }
        }

        if !self.state.in_flight() {
            self.advance(&mut events);
        }
        events
    }

    pub fn on_request_failed(&mut self, stream_id: Uuid, detail: impl Into<String>) -> Vec<SessionEvent> {
        if self.active_stream() != Some(stream_id) {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.fail(StreamError::RequestFailed(detail.into()), &mut events);
        self.advance(&mut events);
        events
    }

    /// The relay finished the upstream response. A stream still in flight
    /// never saw `[DONE]` and cannot complete any more.
    pub fn on_stream_end(&mut self, stream_id: Uuid) -> Vec<SessionEvent> {
        if self.active_stream() != Some(stream_id) {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.fail(
            StreamError::ConnectionLost("upstream closed the stream before [DONE]".to_string()),
            &mut events,
        );
        self.advance(&mut events);
        events
    }

    /// Routes one push-channel frame by kind and stream id. Frames that do
    /// not concern a stream (pings, notices) produce nothing.
    pub fn on_push(&mut self, push: &PushEvent) -> Vec<SessionEvent> {
        let Some(stream_id) = push.id.as_deref().and_then(|id| Uuid::parse_str(id).ok()) else {
            return Vec::new();
        };

        match push.kind() {
            MESSAGE_EVENT => self.on_chunk(stream_id, &push.data),
            ERROR_EVENT => self.on_request_failed(stream_id, push.data.clone()),
            END_EVENT => self.on_stream_end(stream_id),
            kind => {
                debug!("Ignoring push event {:?} for stream {}", kind, stream_id);
                Vec::new()
            }
        }
    }

    pub fn on_connection_lost(&mut self, detail: impl Into<String>) -> Vec<SessionEvent> {
        if !self.state.in_flight() {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.fail(StreamError::ConnectionLost(detail.into()), &mut events);
        events
    }

    fn start(&mut self, text: String) -> Dispatch {
        self.history.append_user(text);
        let stream_id = Uuid::new_v4();
        self.decoder.reset();
        self.response.clear();
        self.state = StreamState::Awaiting;
        self.active = Some(stream_id);

        Dispatch {
            stream_id,
            request: CompletionRequest::new(self.model.clone(), self.history.snapshot()),
        }
    }

    fn fail(&mut self, error: StreamError, events: &mut Vec<SessionEvent>) {
        warn!("Stream {:?} failed: {}", self.active, error);
        self.decoder.reset();
        self.response.clear();
        self.state = StreamState::Errored(error.clone());
        if let Some(stream_id) = self.active {
            events.push(SessionEvent::Failed { stream_id, error });
        }
    }

    fn advance(&mut self, events: &mut Vec<SessionEvent>) {
        if let Some(next) = self.queue.pop_front() {
            events.push(SessionEvent::Dispatch(self.start(next)));
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn active_stream(&self) -> Option<Uuid> {
        self.active.filter(|_| self.state.in_flight())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}
