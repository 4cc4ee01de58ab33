//! WebSocket server for chunkline uploads.
//!
//! Accepts any number of client connections, decodes JSON requests and
//! binary append frames, and dispatches them to a [`Handler`]. The
//! [`StoreHandler`] binds the four upload operations onto an
//! [`AssemblyStore`](chunkline_store::AssemblyStore).

mod connection;
mod handler;
mod server;
mod store_handler;

pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, UploadServer};
pub use store_handler::StoreHandler;

/// Send buffer capacity per connection.
///
/// A client has at most one request in flight, so responses never pile up;
/// the headroom is for pongs.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
