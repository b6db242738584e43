//! Upload payload sources.
//!
//! Concurrent chunk workers read disjoint byte ranges of the same payload, so a
//! source must serve reads by offset without a shared cursor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::planner::ChunkDescriptor;

/// A payload that can be read one chunk at a time
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Total payload length in bytes
    fn len(&self) -> u64;

    /// Whether the payload is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the bytes covered by `chunk`
    async fn read_chunk(&self, chunk: &ChunkDescriptor) -> Result<Bytes>;
}

#[async_trait]
impl ChunkSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    async fn read_chunk(&self, chunk: &ChunkDescriptor) -> Result<Bytes> {
        if chunk.is_empty() {
            return Ok(Bytes::new());
        }
        let start = chunk.start_offset as usize;
        let end = start + chunk.size_bytes as usize;
        if end > Bytes::len(self) {
            return Err(Error::Other(format!(
                "chunk {} ({}) is outside the {}-byte payload",
                chunk.index,
                chunk.range_header(),
                Bytes::len(self)
            )));
        }
        // Zero-copy view into the shared buffer
        Ok(self.slice(start..end))
    }
}

/// Positional read of exactly `buf.len()` bytes at `offset`
#[cfg(unix)]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

/// Positional read of exactly `buf.len()` bytes at `offset`
#[cfg(windows)]
fn read_exact_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0;
    while read < buf.len() {
        let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        read += n;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_exact_at(_file: &std::fs::File, _buf: &mut [u8], _offset: u64) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "positional reads not supported on this platform",
    ))
}

/// A file on disk used as an upload payload
///
/// The length is captured at open time; a file that shrinks afterwards makes the
/// affected chunk reads fail with `UnexpectedEof`.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Arc<std::fs::File>,
    len: u64,
}

impl FileSource {
    /// Open `path` for chunked reading
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        let file = file.into_std().await;

        Ok(Self {
            path,
            file: Arc::new(file),
            len,
        })
    }

    /// Path the source was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component of the path, useful as a default object name
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_chunk(&self, chunk: &ChunkDescriptor) -> Result<Bytes> {
        if chunk.is_empty() {
            return Ok(Bytes::new());
        }
        let file = Arc::clone(&self.file);
        let offset = chunk.start_offset;
        let size = chunk.size_bytes as usize;

        let buf = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut buf = vec![0u8; size];
            read_exact_at(&file, &mut buf, offset)?;
            Ok(buf)
        })
        .await
        .map_err(|e| Error::Other(format!("chunk read task panicked: {e}")))??;

        Ok(Bytes::from(buf))
    }
}
