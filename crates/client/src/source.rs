//! Byte sources a transfer reads its chunks from.

use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A boxed future resolving to the bytes read.
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<Vec<u8>>> + Send + 'a>>;

/// Random-access source of upload bytes.
pub trait ChunkSource: Send {
    /// Total number of bytes available.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at the end of the source.
    fn read_at(&mut self, offset: u64, len: usize) -> ReadFuture<'_>;
}

/// A file on disk.
pub struct FileSource {
    file: tokio::fs::File,
    len: u64,
}

impl FileSource {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self { file, len })
    }
}

impl ChunkSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, len: usize) -> ReadFuture<'_> {
        Box::pin(async move {
            let remaining = self.len.saturating_sub(offset);
            let want = (len as u64).min(remaining) as usize;
            let mut buf = vec![0u8; want];
            if want == 0 {
                return Ok(buf);
            }

            self.file.seek(SeekFrom::Start(offset)).await?;
            let mut filled = 0;
            while filled < want {
                let n = self.file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(buf)
        })
    }
}

/// Bytes held in memory.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl ChunkSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, len: usize) -> ReadFuture<'_> {
        let start = (offset.min(self.data.len() as u64)) as usize;
        let end = start.saturating_add(len).min(self.data.len());
        let chunk = self.data[start..end].to_vec();
        Box::pin(async move { Ok(chunk) })
    }
}
