//! Resumable chunked-upload client.
//!
//! Provides the transfer driver (open, append loop, close), its retry
//! policy and adaptive chunk sizing, and a WebSocket transport.

pub mod chunking;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub(crate) mod pumps;
pub mod retry;
pub mod source;
pub mod status;
pub mod types;
pub mod ws_client;

pub use chunking::ChunkSizer;
pub use config::{ClientConfig, ClientConfigBuilder, ConfigError};
pub use connection::{RequestFuture, UploadConnection};
pub use driver::{TransferDriver, TransferHandle};
pub use error::{RequestError, SizeMismatch, UploadError};
pub use retry::{RetryDecision, RetryPolicy};
pub use source::{ChunkSource, FileSource, MemorySource};
pub use status::{StatusReporter, TransferClock, TransferStatus};
pub use types::{
    TransferEvent, TransferOutcome, TransferPhase, TransferState, UploadTarget,
};
pub use ws_client::WsConnection;
