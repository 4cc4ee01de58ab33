//! Wire protocol shared by the chunkline client and server.
//!
//! Text frames carry a JSON [`Message`] envelope; appends travel as binary
//! frames (see [`binary`]) so chunk bytes are never base64-encoded.

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use binary::{
    AppendFrame, FrameError, checksum_bytes, encode_append_frame, parse_append_frame,
};
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use messages::{
    AppendHeader, CloseRequest, OpenRequest, OpenResponse, RemoveRequest, RemoveResponse,
    SizeResponse,
};
pub use types::{ErrorKind, SessionId};
