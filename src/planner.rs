//! Chunk planning: split a payload length into ordered, contiguous byte ranges.
//!
//! Planning is deterministic, so a restarted transfer with the same inputs gets
//! exactly the same part numbers and byte ranges as the attempt it replaces.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One contiguous byte range of a payload, transferred by a single transport call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Position of the chunk, starting at 1 (doubles as the multipart part number)
    pub index: u32,
    /// First byte offset covered by the chunk
    pub start_offset: u64,
    /// Last byte offset covered by the chunk (inclusive)
    ///
    /// Meaningless for a zero-length chunk; check [`is_empty`](Self::is_empty) first.
    pub end_offset: u64,
    /// Number of bytes in the chunk
    pub size_bytes: u64,
}

impl ChunkDescriptor {
    /// Descriptor for a whole payload transferred as a single piece
    pub fn whole(total_size_bytes: u64) -> Self {
        Self {
            index: 1,
            start_offset: 0,
            end_offset: total_size_bytes.saturating_sub(1),
            size_bytes: total_size_bytes,
        }
    }

    /// Whether the chunk carries no bytes (only produced for empty payloads)
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    /// HTTP `Range` header value for this chunk, e.g. `bytes=0-1023`
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start_offset, self.end_offset)
    }
}

/// Plan the chunks covering `[0, total_size_bytes)`.
///
/// Sizes are signed so that a negative size coming from a caller or a backend
/// response is rejected rather than silently wrapped.
///
/// - Fails with [`Error::InvalidSize`] if `total_size_bytes < 0` or `chunk_size_bytes <= 0`.
/// - An empty payload produces exactly one zero-length chunk with index 1.
/// - The last chunk ends at `total_size_bytes - 1` and is never padded.
///
/// # Example
///
/// ```
/// use cloud_transfer::planner::plan;
///
/// let chunks = plan(10, 4).unwrap();
/// let sizes: Vec<u64> = chunks.iter().map(|c| c.size_bytes).collect();
/// assert_eq!(sizes, vec![4, 4, 2]);
/// assert_eq!(chunks[2].range_header(), "bytes=8-9");
/// ```
pub fn plan(total_size_bytes: i64, chunk_size_bytes: i64) -> Result<Vec<ChunkDescriptor>> {
    if total_size_bytes < 0 || chunk_size_bytes <= 0 {
        return Err(Error::InvalidSize {
            total_size_bytes,
            chunk_size_bytes,
        });
    }

    let total = total_size_bytes as u64;
    let chunk_size = chunk_size_bytes as u64;

    if total == 0 {
        return Ok(vec![ChunkDescriptor {
            index: 1,
            start_offset: 0,
            end_offset: 0,
            size_bytes: 0,
        }]);
    }

    let count = total.div_ceil(chunk_size);
    let count = u32::try_from(count).map_err(|_| Error::InvalidSize {
        total_size_bytes,
        chunk_size_bytes,
    })?;

    let mut chunks = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for index in 1..=count {
        let size_bytes = chunk_size.min(total - offset);
        chunks.push(ChunkDescriptor {
            index,
            start_offset: offset,
            end_offset: offset + size_bytes - 1,
            size_bytes,
        });
        offset += size_bytes;
    }

    Ok(chunks)
}
