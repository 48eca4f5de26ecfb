use bytes::Bytes;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::stream::event_source::{
    encode_frame, END_EVENT, ERROR_EVENT, NOTICE_EVENT, PING_EVENT,
};

/// Fans push-channel frames out to every connected `/events` client.
pub struct Broadcaster {
    inner: Mutex<BroadcasterInner>,
    client_buffer: usize,
}

#[derive(Debug, Default)]
struct BroadcasterInner {
    clients: Vec<mpsc::Sender<Bytes>>,
}

impl Broadcaster {
    pub fn new(client_buffer: usize) -> Self {
        Self {
            inner: Mutex::new(BroadcasterInner::default()),
            client_buffer: client_buffer.max(1),
        }
    }

    /// Constructs a broadcaster and spawns its stale-client sweep.
    pub fn create(client_buffer: usize, ping_interval: Duration) -> Arc<Self> {
        let this = Arc::new(Self::new(client_buffer));
        Self::spawn_ping(Arc::clone(&this), ping_interval);
        info!("Created broadcaster (ping every {:?})", ping_interval);
        this
    }

    fn spawn_ping(this: Arc<Self>, period: Duration) {
        actix_web::rt::spawn(async move {
            let mut interval = actix_web::rt::time::interval(period);
            loop {
                interval.tick().await;
                this.remove_stale_clients();
            }
        });
    }

    /// Pings every client and forgets the ones that can no longer take a
    /// frame.
    pub fn remove_stale_clients(&self) {
        let removed = self.send_frame(ping_frame());
        if removed > 0 {
            debug!("Removed {} stale client(s), {} active", removed, self.client_count());
        }
    }

    /// Registers a client and returns the receiving end of its frame channel.
    pub fn new_client(&self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.client_buffer);
        // a fresh channel always has room for the greeting
        let _ = tx.try_send(ping_frame());
        let mut inner = self.inner.lock();
        inner.clients.push(tx);
        info!("Added push client, {} active", inner.clients.len());
        rx
    }

    pub fn broadcast_chunk(&self, stream_id: Uuid, text: &str) {
        let id = stream_id.to_string();
        self.send_frame(Bytes::from(encode_frame(None, Some(&id), text)));
    }

    pub fn broadcast_error(&self, stream_id: Uuid, detail: &str) {
        let id = stream_id.to_string();
        self.send_frame(Bytes::from(encode_frame(Some(ERROR_EVENT), Some(&id), detail)));
    }

    /// Marks the end of the upstream response for `stream_id`.
    pub fn broadcast_end(&self, stream_id: Uuid) {
        let id = stream_id.to_string();
        self.send_frame(Bytes::from(encode_frame(Some(END_EVENT), Some(&id), "")));
    }

    pub fn broadcast_notice(&self, text: &str) {
        self.send_frame(Bytes::from(encode_frame(Some(NOTICE_EVENT), None, text)));
    }

    /// Offers `frame` to every client without waiting. A client whose
    /// buffer is full has stopped reading and is dropped along with the
    /// closed ones; its stream then ends and it has to reconnect.
    /// Returns how many clients were dropped.
    fn send_frame(&self, frame: Bytes) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.clients.len();
        inner.clients.retain(|client| match client.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Dropping push client with a full buffer");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        before - inner.clients.len()
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }
}

fn ping_frame() -> Bytes {
    Bytes::from(encode_frame(Some(PING_EVENT), None, "connected"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventSourceParser;

    #[tokio::test]
    async fn clients_receive_greeting_then_chunks() {
        let broadcaster = Broadcaster::new(4);
        let mut rx = broadcaster.new_client();
        let stream_id = Uuid::new_v4();
        broadcaster.broadcast_chunk(stream_id, "data: [DONE]\n\n");

        let mut parser = EventSourceParser::new();
        let greeting = parser.feed(&rx.recv().await.unwrap());
        assert_eq!(greeting[0].kind(), PING_EVENT);

        let chunk = parser.feed(&rx.recv().await.unwrap());
        assert_eq!(chunk[0].data, "data: [DONE]\n\n");
        assert_eq!(chunk[0].id, Some(stream_id.to_string()));
    }

    #[tokio::test]
    async fn stale_clients_are_removed() {
        let broadcaster = Broadcaster::new(4);
        let _alive = broadcaster.new_client();
        drop(broadcaster.new_client());
        assert_eq!(broadcaster.client_count(), 2);

        broadcaster.remove_stale_clients();
        assert_eq!(broadcaster.client_count(), 1);
    }

    #[tokio::test]
    async fn unread_clients_do_not_stall_broadcasts() {
        let broadcaster = Broadcaster::new(2);
        // never read: greeting plus one chunk fill it
        let _stuck = broadcaster.new_client();
        let mut reader = broadcaster.new_client();
        let mut parser = EventSourceParser::new();
        parser.feed(&reader.recv().await.unwrap());

        let stream_id = Uuid::new_v4();
        for text in ["one", "two", "three"] {
            broadcaster.broadcast_chunk(stream_id, text);
            let frames = parser.feed(&reader.recv().await.unwrap());
            assert_eq!(frames[0].data, text);
        }
        assert_eq!(broadcaster.client_count(), 1);
    }

    #[tokio::test]
    async fn end_frame_carries_the_stream_id() {
        let broadcaster = Broadcaster::new(4);
        let mut rx = broadcaster.new_client();
        let stream_id = Uuid::new_v4();
        broadcaster.broadcast_end(stream_id);

        let mut parser = EventSourceParser::new();
        parser.feed(&rx.recv().await.unwrap());
        let end = parser.feed(&rx.recv().await.unwrap());
        assert_eq!(end[0].kind(), END_EVENT);
        assert_eq!(end[0].id, Some(stream_id.to_string()));
    }
}
