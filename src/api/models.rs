use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the client-chosen id of a completion stream.
pub const STREAM_ID_HEADER: &str = "x-stream-id";

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamAccepted {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
