use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for any inbound frame before a connection is considered dead.
///
/// Any message resets the deadline, not only pongs, so a slow chunk write
/// on the server side does not tear the connection down.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum WebSocket message size in bytes (64 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Maximum size of a single WebSocket frame accepted by either peer (16 MiB).
pub const WS_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest chunk payload a client may send in one append.
///
/// An append travels as one unfragmented frame, so this leaves room under
/// [`WS_MAX_FRAME_SIZE`] for the length prefix and the JSON header.
pub const MAX_CHUNK_SIZE: usize = WS_MAX_FRAME_SIZE - 64 * 1024;

/// Default upper bound for a single request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "append")]
    Append,
    #[serde(rename = "close")]
    Close,
    #[serde(rename = "remove")]
    Remove,
    #[serde(rename = "ping")]
    Ping,

    // Responses from server to client
    #[serde(rename = "open_response")]
    OpenResponse,
    #[serde(rename = "append_response")]
    AppendResponse,
    #[serde(rename = "close_response")]
    CloseResponse,
    #[serde(rename = "remove_response")]
    RemoveResponse,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    /// Returns the response type the server answers a request with.
    ///
    /// `None` for types that are already responses.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            MessageType::Open => Some(MessageType::OpenResponse),
            MessageType::Append => Some(MessageType::AppendResponse),
            MessageType::Close => Some(MessageType::CloseResponse),
            MessageType::Remove => Some(MessageType::RemoveResponse),
            MessageType::Ping => Some(MessageType::Pong),
            _ => None,
        }
    }
}
