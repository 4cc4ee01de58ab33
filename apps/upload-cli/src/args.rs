//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use chunkline_client::{ClientConfig, ConfigError};
use chunkline_protocol::SessionId;

/// Upload a file to a chunkline server, resuming across connection drops.
#[derive(Debug, Parser)]
#[command(name = "chunkline-upload", version)]
pub struct Args {
    /// Local file to upload.
    pub file: PathBuf,

    /// Server WebSocket URL.
    #[arg(long, env = "CHUNKLINE_SERVER", default_value = "ws://127.0.0.1:7780")]
    pub server: String,

    /// Name of the file on the server (defaults to the local file name).
    #[arg(long)]
    pub name: Option<String>,

    /// Replace an existing file of the same name.
    #[arg(long)]
    pub overwrite: bool,

    /// Continue an interrupted session instead of opening a new one.
    #[arg(long, value_name = "SESSION_ID")]
    pub resume: Option<SessionId>,

    /// Refuse files larger than this many bytes (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub size_limit: u64,

    /// Smallest chunk in bytes.
    #[arg(long, default_value_t = 256 * 1024)]
    pub chunk_min: usize,

    /// Chunk growth/shrink step in bytes.
    #[arg(long, default_value_t = 256 * 1024)]
    pub chunk_step: usize,

    /// Largest chunk in bytes.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub chunk_max: usize,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Consecutive retries before giving up.
    #[arg(long, default_value_t = 5)]
    pub retry_limit: u32,

    /// Seconds between retries.
    #[arg(long, default_value_t = 2)]
    pub retry_interval: u64,

    /// Skip per-chunk SHA-256 checksums.
    #[arg(long)]
    pub no_verify: bool,
}

impl Args {
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        ClientConfig::builder()
            .size_limit(self.size_limit)
            .chunk_min(self.chunk_min)
            .chunk_step(self.chunk_step)
            .chunk_max(self.chunk_max)
            .request_timeout(Duration::from_secs(self.timeout))
            .retry_limit(self.retry_limit)
            .retry_interval(Duration::from_secs(self.retry_interval))
            .verify_chunks(!self.no_verify)
            .build()
    }

    /// Server-side file name.
    pub fn target_name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            self.file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
    }
}
