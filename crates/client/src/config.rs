//! Client configuration.

use std::time::Duration;

use chunkline_protocol::constants::{DEFAULT_REQUEST_TIMEOUT, MAX_CHUNK_SIZE};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Errors from [`ClientConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk minimum must be greater than zero")]
    ZeroChunkMin,

    #[error("chunk step must be greater than zero")]
    ZeroChunkStep,

    #[error("chunk minimum ({min}) exceeds chunk maximum ({max})")]
    ChunkRange { min: usize, max: usize },

    #[error("chunk maximum ({max}) exceeds the protocol limit ({limit})")]
    ChunkTooLarge { max: usize, limit: usize },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Immutable, validated client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    size_limit: u64,
    chunk_min: usize,
    chunk_step: usize,
    chunk_max: usize,
    request_timeout: Duration,
    retry_limit: u32,
    retry_interval: Duration,
    verify_chunks: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            size_limit: 0,
            chunk_min: 256 * KIB,
            chunk_step: 256 * KIB,
            chunk_max: 8 * MIB,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_limit: 5,
            retry_interval: Duration::from_secs(2),
            verify_chunks: true,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Largest file the client will attempt to send (`None` = unlimited).
    pub fn size_limit(&self) -> Option<u64> {
        (self.size_limit > 0).then_some(self.size_limit)
    }

    pub fn chunk_min(&self) -> usize {
        self.chunk_min
    }

    pub fn chunk_step(&self) -> usize {
        self.chunk_step
    }

    pub fn chunk_max(&self) -> usize {
        self.chunk_max
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Whether appends carry a SHA-256 checksum of the chunk.
    pub fn verify_chunks(&self) -> bool {
        self.verify_chunks
    }
}

/// Builder for [`ClientConfig`]; starts from the defaults.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Whole-file size limit in bytes (0 = unlimited).
    pub fn size_limit(mut self, bytes: u64) -> Self {
        self.config.size_limit = bytes;
        self
    }

    pub fn chunk_min(mut self, bytes: usize) -> Self {
        self.config.chunk_min = bytes;
        self
    }

    pub fn chunk_step(mut self, bytes: usize) -> Self {
        self.config.chunk_step = bytes;
        self
    }

    pub fn chunk_max(mut self, bytes: usize) -> Self {
        self.config.chunk_max = bytes;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = limit;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    pub fn verify_chunks(mut self, verify: bool) -> Self {
        self.config.verify_chunks = verify;
        self
    }

    /// Validates the settings and returns the finished configuration.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let c = self.config;
        if c.chunk_min == 0 {
            return Err(ConfigError::ZeroChunkMin);
        }
        if c.chunk_step == 0 {
            return Err(ConfigError::ZeroChunkStep);
        }
        if c.chunk_min > c.chunk_max {
            return Err(ConfigError::ChunkRange {
                min: c.chunk_min,
                max: c.chunk_max,
            });
        }
        if c.chunk_max > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooLarge {
                max: c.chunk_max,
                limit: MAX_CHUNK_SIZE,
            });
        }
        if c.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request timeout"));
        }
        if c.retry_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("retry interval"));
        }
        Ok(c)
    }
}
