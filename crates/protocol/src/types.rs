use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque token binding a client to one in-progress temporary file.
///
/// Backed by a random (v4) UUID: 122 bits of CSPRNG output, never sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Allocates a fresh, unguessable session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Compact 32-character lowercase hex form, safe for use in file names.
    pub fn to_file_stem(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Machine-checkable failure kind carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A final file with the target name exists and overwrite is disallowed.
    AlreadyExists,
    /// The session id does not resolve to a temp artifact.
    UnknownSession,
    /// The append would push the file past the configured size limit.
    SizeExceeded,
    /// The target name is empty, absolute, or escapes the storage directory.
    InvalidName,
    /// The chunk payload does not match the checksum in its header.
    ChecksumMismatch,
    /// The request could not be decoded.
    BadRequest,
    /// Any other server-side failure.
    Internal,
}

impl ErrorKind {
    /// HTTP-like status code sent alongside the kind.
    pub fn code(&self) -> i32 {
        match self {
            ErrorKind::AlreadyExists => 409,
            ErrorKind::UnknownSession => 404,
            ErrorKind::SizeExceeded => 413,
            ErrorKind::InvalidName => 400,
            ErrorKind::ChecksumMismatch => 422,
            ErrorKind::BadRequest => 400,
            ErrorKind::Internal => 500,
        }
    }

    /// Best-effort mapping from a bare status code, for error envelopes
    /// that arrive without a `kind`.
    pub fn from_code(code: i32) -> Self {
        match code {
            409 => ErrorKind::AlreadyExists,
            404 => ErrorKind::UnknownSession,
            413 => ErrorKind::SizeExceeded,
            422 => ErrorKind::ChecksumMismatch,
            400 => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::UnknownSession => "unknown session",
            ErrorKind::SizeExceeded => "size exceeded",
            ErrorKind::InvalidName => "invalid name",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}
