//! Chunked download: ranged fetches, ordered reassembly, whole-object fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::reassembly::Reassembler;
use super::workers::{CallDeadline, chunk_stream, complete_empty_chunk, settle_error};
use super::{DownloadRequest, TransferContext, TransferJob};
use crate::error::{Error, Result};
use crate::planner::{ChunkDescriptor, plan};
use crate::task::{TaskHandle, TransferTask};
use crate::transport::ProgressCallback;
use crate::types::{Event, TransferKind};

/// Drives chunked downloads against the context's transport
#[derive(Clone, Debug)]
pub struct DownloadOrchestrator {
    ctx: TransferContext,
}

impl DownloadOrchestrator {
    /// Create an orchestrator sharing `ctx`
    pub fn new(ctx: TransferContext) -> Self {
        Self { ctx }
    }

    /// Start downloading into memory
    ///
    /// The job resolves to the object's bytes in their original order.
    pub fn start_download(&self, request: DownloadRequest) -> TransferJob<Bytes> {
        let handle = self.register(&request);
        let capacity = usize::try_from(request.total_size_bytes.max(0)).unwrap_or(0);
        let work = {
            let ctx = self.ctx.clone();
            let handle = handle.clone();
            async move {
                let mut buf = Vec::with_capacity(capacity);
                run_download(&ctx, &handle, &request, &mut buf).await?;
                Ok(Bytes::from(buf))
            }
        };
        self.ctx.launch(handle, work)
    }

    /// Start downloading into `writer`
    ///
    /// Chunks are written as soon as every earlier chunk has been written, so at
    /// most the out-of-order tail is held in memory. The job resolves to the
    /// number of bytes written.
    pub fn start_download_to<W>(&self, request: DownloadRequest, writer: W) -> TransferJob<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handle = self.register(&request);
        let work = {
            let ctx = self.ctx.clone();
            let handle = handle.clone();
            async move {
                let mut writer = writer;
                run_download(&ctx, &handle, &request, &mut writer).await
            }
        };
        self.ctx.launch(handle, work)
    }

    fn register(&self, request: &DownloadRequest) -> TaskHandle {
        let ctx = &self.ctx;
        let total = u64::try_from(request.total_size_bytes).unwrap_or(0);
        let task = TransferTask::new(
            ctx.next_task_id(),
            TransferKind::Download,
            request.bucket_name.clone(),
            request.object_name.clone(),
            total,
        );
        let handle = TaskHandle::new(task, ctx.task_token());

        tracing::info!(
            task_id = handle.id().0,
            bucket = %request.bucket_name,
            object = %request.object_name,
            size_bytes = request.total_size_bytes,
            "download queued"
        );
        ctx.emit(Event::Queued {
            id: handle.id(),
            kind: TransferKind::Download,
            bucket_name: request.bucket_name.clone(),
            object_name: request.object_name.clone(),
            total_size_bytes: total,
        });
        handle
    }
}

async fn run_download<W>(
    ctx: &TransferContext,
    handle: &TaskHandle,
    request: &DownloadRequest,
    writer: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let id = handle.id();
    let (chunk_size, max_concurrency) = ctx.resolve(request.chunk_size_bytes, request.max_concurrency);
    let ranged = ctx.transport.supports_range_requests();

    let chunks = if ranged {
        plan(request.total_size_bytes, chunk_size)?
    } else {
        let total = u64::try_from(request.total_size_bytes).map_err(|_| Error::InvalidSize {
            total_size_bytes: request.total_size_bytes,
            chunk_size_bytes: chunk_size,
        })?;
        vec![ChunkDescriptor::whole(total)]
    };
    handle.update(|t| t.set_chunks(&chunks));

    if handle.is_cancelled() {
        return Err(Error::Cancelled);
    }

    handle.update(|t| t.start());
    tracing::info!(task_id = id.0, chunks = chunks.len(), ranged, max_concurrency, "download started");
    ctx.emit(Event::Started {
        id,
        chunks: chunks.len(),
    });

    if let [only] = chunks.as_slice()
        && only.is_empty()
    {
        complete_empty_chunk(ctx, handle, only);
        writer.flush().await?;
        return Ok(0);
    }

    let written = match fetch_chunks(ctx, handle, request, &chunks, max_concurrency, ranged, writer).await {
        Err(Fetch::RangeIgnored(e)) => {
            if !handle.update(|t| t.replan_whole()) {
                return Err(e);
            }
            tracing::warn!(task_id = id.0, error = %e, "range requests not honored, fetching whole object");
            let whole = ChunkDescriptor::whole(handle.snapshot().total_size_bytes);
            fetch_chunks(ctx, handle, request, &[whole], 1, false, writer)
                .await
                .map_err(Fetch::into_error)?
        }
        other => other.map_err(Fetch::into_error)?,
    };

    writer.flush().await?;
    Ok(written)
}

/// Why a fetch pass ended early
enum Fetch {
    /// The backend answered a ranged request with the whole object before any
    /// byte was written
    RangeIgnored(Error),
    /// Any other failure, final for the task
    Failed(Error),
}

impl Fetch {
    fn into_error(self) -> Error {
        match self {
            Fetch::RangeIgnored(e) | Fetch::Failed(e) => e,
        }
    }
}

impl From<std::io::Error> for Fetch {
    fn from(e: std::io::Error) -> Self {
        Fetch::Failed(e.into())
    }
}

/// Fetch `chunks` and write them to `writer` in index order
///
/// Ranged passes bound every call by the chunk timeout. The whole-object pass
/// streams a single body of unknown duration, so it only fails once the body
/// stops making progress for that long.
async fn fetch_chunks<W>(
    ctx: &TransferContext,
    handle: &TaskHandle,
    request: &DownloadRequest,
    chunks: &[ChunkDescriptor],
    max_concurrency: usize,
    ranged: bool,
    writer: &mut W,
) -> std::result::Result<u64, Fetch>
where
    W: AsyncWrite + Unpin + Send,
{
    let id = handle.id();
    let transport = Arc::clone(&ctx.transport);
    let bucket: Arc<str> = Arc::from(request.bucket_name.as_str());
    let object: Arc<str> = Arc::from(request.object_name.as_str());
    let range_ignored = Arc::new(AtomicBool::new(false));
    let fetch = |chunk: ChunkDescriptor, progress: ProgressCallback| {
        let transport = Arc::clone(&transport);
        let bucket = Arc::clone(&bucket);
        let object = Arc::clone(&object);
        let range_ignored = Arc::clone(&range_ignored);
        async move {
            if ranged {
                let result = transport
                    .download_part(&bucket, &object, &chunk, progress)
                    .await;
                if let Err(Error::RangeNotHonored { .. }) = &result {
                    range_ignored.store(true, Ordering::Relaxed);
                }
                return result;
            }
            let body = transport.download_file(&bucket, &object, progress).await?;
            if body.len() as u64 != chunk.size_bytes {
                return Err(Error::LengthMismatch {
                    index: chunk.index,
                    expected: chunk.size_bytes,
                    actual: body.len() as u64,
                });
            }
            Ok(body)
        }
    };
    let deadline = if ranged {
        CallDeadline::Total(ctx.transfer.chunk_timeout)
    } else {
        CallDeadline::Idle(ctx.transfer.chunk_timeout)
    };

    let mut reassembler = Reassembler::new(chunks.len() as u32);
    let mut written = 0u64;
    let abort = handle.cancel_token().child_token();
    {
        let mut results = chunk_stream(ctx, handle, &abort, chunks, max_concurrency, deadline, &fetch);
        while let Some(result) = results.next().await {
            let (chunk, data) = match result {
                Ok(done) => done,
                Err(e) => {
                    abort.cancel();
                    let e = settle_error(handle, e);
                    if written == 0 && range_ignored.load(Ordering::Relaxed) && !handle.is_cancelled() {
                        return Err(Fetch::RangeIgnored(e));
                    }
                    return Err(Fetch::Failed(e));
                }
            };
            for segment in reassembler.push(chunk.index, data) {
                writer.write_all(&segment).await?;
                written += segment.len() as u64;
            }
            tracing::trace!(
                task_id = id.0,
                low_water_mark = reassembler.low_water_mark(),
                buffered_bytes = reassembler.buffered_bytes(),
                "reassembly advanced"
            );
        }
    }

    if handle.is_cancelled() {
        return Err(Fetch::Failed(Error::Cancelled));
    }
    if !reassembler.is_complete() {
        return Err(Fetch::Failed(Error::Other("download ended with missing chunks".to_string())));
    }
    Ok(written)
}
