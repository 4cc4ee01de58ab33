//! Client error types.

use std::fmt;

use chunkline_protocol::ErrorKind;

/// Failure of a single request round trip.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The request never reached the server, or its response never came back
    /// intact (connect failure, dropped socket, timeout, malformed reply).
    #[error("connectivity fault: {0}")]
    Connectivity(String),

    /// The server answered with a well-formed error.
    #[error("server rejected request ({kind}): {message}")]
    Rejected { kind: ErrorKind, message: String },
}

impl RequestError {
    /// Returns `true` if re-issuing the identical request may succeed.
    ///
    /// A checksum rejection means the chunk was damaged in transit, which
    /// is a transport fault even though the server reported it.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Connectivity(_) => true,
            RequestError::Rejected { kind, .. } => *kind == ErrorKind::ChecksumMismatch,
        }
    }
}

/// Terminal failure of a transfer.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file already exists on the server: {0}")]
    AlreadyExists(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("size limit exceeded: {0}")]
    SizeExceeded(String),

    #[error("file is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("server error ({kind}): {message}")]
    Server { kind: ErrorKind, message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    Timeout { attempts: u32, last: String },

    #[error("source ended at {offset} bytes, expected {expected}")]
    SourceTruncated { offset: u64, expected: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Converts a non-retryable request failure into a transfer failure.
    pub(crate) fn from_request(err: RequestError) -> Self {
        match err {
            RequestError::Rejected { kind, message } => match kind {
                ErrorKind::AlreadyExists => UploadError::AlreadyExists(message),
                ErrorKind::UnknownSession => UploadError::UnknownSession(message),
                ErrorKind::SizeExceeded => UploadError::SizeExceeded(message),
                kind => UploadError::Server { kind, message },
            },
            RequestError::Connectivity(message) => UploadError::Timeout {
                attempts: 0,
                last: message,
            },
        }
    }
}

/// The finalized file's size disagrees with the declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatch {
    pub declared: u64,
    pub actual: u64,
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "final size {} does not match declared size {}",
            self.actual, self.declared
        )
    }
}
