//! Public types for the transfer driver.

use std::time::{Duration, UNIX_EPOCH};

use chunkline_protocol::SessionId;

use crate::error::SizeMismatch;
use crate::status::TransferStatus;

/// What is being uploaded. Fixed for the lifetime of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Name of the final file on the server.
    pub file_name: String,
    pub declared_size: u64,
    /// Modification time to stamp on the final file, in Unix milliseconds.
    pub declared_modified_time: Option<i64>,
}

impl UploadTarget {
    pub fn new(file_name: impl Into<String>, declared_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            declared_size,
            declared_modified_time: None,
        }
    }

    pub fn with_modified_time(mut self, millis: i64) -> Self {
        self.declared_modified_time = Some(millis);
        self
    }

    /// Builds a target from a local file's metadata.
    pub async fn from_file(
        path: &std::path::Path,
        file_name: impl Into<String>,
    ) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        Ok(Self {
            file_name: file_name.into(),
            declared_size: meta.len(),
            declared_modified_time: modified,
        })
    }
}

/// Driver lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    Idle,
    Opening,
    Appending,
    Paused,
    Closing,
    Stopping,
    Done,
    Failed,
}

impl TransferPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferPhase::Done | TransferPhase::Failed)
    }
}

/// Client-side view of a transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferState {
    /// Bytes the server has confirmed.
    pub offset: u64,
    pub chunk_size: usize,
    /// Last measured throughput in bytes per second.
    pub speed: f64,
    pub phase: TransferPhase,
    pub retry_count: u32,
}

impl TransferState {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            offset: 0,
            chunk_size,
            speed: 0.0,
            phase: TransferPhase::Idle,
            retry_count: 0,
        }
    }
}

/// Notifications emitted while a transfer runs.
///
/// Exactly one of `Completed`, `Stopped` or `Failed` ends every run.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Opened { session_id: SessionId, resumed: bool },
    Progress(TransferStatus),
    Paused,
    Resumed,
    Retrying { attempt: u32, delay: Duration },
    Warning { message: String },
    Completed { final_size: u64 },
    Stopped,
    Failed { error: String },
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. } | TransferEvent::Stopped | TransferEvent::Failed { .. }
        )
    }
}

/// Result of a transfer that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// `None` if the transfer was stopped before a session was opened.
    pub session_id: Option<SessionId>,
    /// Size reported by `close`, or the confirmed offset if stopped.
    pub final_size: u64,
    /// Set when the finalized size differs from the declared size.
    pub size_mismatch: Option<SizeMismatch>,
    /// `true` if the transfer was aborted through `stop()`.
    pub stopped: bool,
}

impl TransferOutcome {
    /// `true` if the file was finalized on the server.
    pub fn is_complete(&self) -> bool {
        !self.stopped
    }
}
