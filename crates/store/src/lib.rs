//! Server-side session/assembly engine for resumable chunked uploads.
//!
//! An [`AssemblyStore`] owns the temp-file lifecycle of every upload
//! session: `open` creates an empty temp artifact, `append` grows it
//! (idempotently, see [`AssemblyStore::append`]), `close` atomically renames
//! it to its final name and `remove` aborts it. The [`SessionRegistry`]
//! derives temp paths from `(target name, session id)` and serializes
//! concurrent operations on the same session.

mod assembly;
mod config;
mod registry;
mod validation;

pub use assembly::AssemblyStore;
pub use chunkline_protocol::checksum_bytes;
pub use config::StoreConfig;
pub use registry::SessionRegistry;
pub use validation::validate_target_name;

use chunkline_protocol::{ErrorKind, SessionId};

/// Errors produced by the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("size limit exceeded: {current} + {incoming} bytes > {limit}")]
    SizeExceeded {
        current: u64,
        incoming: u64,
        limit: u64,
    },

    #[error("invalid target name: {0}")]
    InvalidName(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Wire-level kind reported to the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::UnknownSession(_) => ErrorKind::UnknownSession,
            StoreError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            StoreError::InvalidName(_) => ErrorKind::InvalidName,
            StoreError::ChecksumMismatch => ErrorKind::ChecksumMismatch,
            StoreError::Io(_) | StoreError::InvalidConfig(_) => ErrorKind::Internal,
        }
    }
}
