use serde::{Deserialize, Serialize};

use crate::types::SessionId;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session for `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    pub name: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// JSON header of a binary append frame.
///
/// The chunk bytes follow the header in the same frame; see [`crate::binary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendHeader {
    /// Request correlation id, echoed by the response.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub session_id: SessionId,
    /// Offset the client believes the server has written up to.
    pub offset: u64,
    /// SHA-256 hex of the chunk (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Finalizes a session: renames the temp artifact to `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    pub name: String,
    pub session_id: SessionId,
    /// Modification time to stamp on the final file, in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    /// Replace an existing file at `name`; must match the `open` request.
    #[serde(default)]
    pub overwrite: bool,
}

/// Aborts a session and deletes its temp artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveRequest {
    pub name: String,
    pub session_id: SessionId,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to `open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResponse {
    pub session_id: SessionId,
}

/// Response to `append` and `close`: the authoritative size on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeResponse {
    pub size: u64,
}

/// Response to `remove` (carries nothing).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResponse {}
