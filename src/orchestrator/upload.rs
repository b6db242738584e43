//! Multipart upload: session init, concurrent part upload, completion.

use std::sync::Arc;

use futures::StreamExt;

use super::workers::{CallDeadline, chunk_stream, settle_error, timed};
use super::{TransferContext, TransferJob, UploadRequest};
use crate::content_type::infer_content_type;
use crate::error::{Error, Result};
use crate::planner::{ChunkDescriptor, plan};
use crate::retry::with_retry;
use crate::source::ChunkSource;
use crate::task::{TaskHandle, TransferTask};
use crate::transport::ProgressCallback;
use crate::types::{Event, ObjectMetadata, TransferKind, UploadSession};

/// Drives multipart uploads against the context's transport
#[derive(Clone, Debug)]
pub struct UploadOrchestrator {
    ctx: TransferContext,
}

impl UploadOrchestrator {
    /// Create an orchestrator sharing `ctx`
    pub fn new(ctx: TransferContext) -> Self {
        Self { ctx }
    }

    /// Start uploading `source` as `request.bucket_name/request.object_name`
    ///
    /// Returns immediately; the upload runs in the background. The job resolves
    /// to the stored object's metadata once the backend confirmed completion.
    pub fn start_upload(
        &self,
        source: Arc<dyn ChunkSource>,
        request: UploadRequest,
    ) -> TransferJob<ObjectMetadata> {
        let ctx = &self.ctx;
        let task = TransferTask::new(
            ctx.next_task_id(),
            TransferKind::Upload,
            request.bucket_name.clone(),
            request.object_name.clone(),
            source.len(),
        );
        let handle = TaskHandle::new(task, ctx.task_token());

        tracing::info!(
            task_id = handle.id().0,
            bucket = %request.bucket_name,
            object = %request.object_name,
            size_bytes = source.len(),
            "upload queued"
        );
        ctx.emit(Event::Queued {
            id: handle.id(),
            kind: TransferKind::Upload,
            bucket_name: request.bucket_name.clone(),
            object_name: request.object_name.clone(),
            total_size_bytes: source.len(),
        });

        let work = run_upload(ctx.clone(), handle.clone(), source, request);
        ctx.launch(handle, work)
    }
}

async fn run_upload(
    ctx: TransferContext,
    handle: TaskHandle,
    source: Arc<dyn ChunkSource>,
    request: UploadRequest,
) -> Result<ObjectMetadata> {
    let id = handle.id();
    let (chunk_size, max_concurrency) = ctx.resolve(request.chunk_size_bytes, request.max_concurrency);
    let total_size = source.len();
    let total = i64::try_from(total_size).map_err(|_| Error::InvalidSize {
        total_size_bytes: i64::MAX,
        chunk_size_bytes: chunk_size,
    })?;

    // Plan before opening a session so bad sizes never leave one dangling
    let chunks = plan(total, chunk_size)?;
    handle.update(|t| t.set_chunks(&chunks));

    if handle.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let content_type = request
        .content_type
        .clone()
        .unwrap_or_else(|| infer_content_type(&request.object_name).to_string());
    let session = Arc::new(open_session(&ctx, &handle, &request, &content_type).await?);

    handle.update(|t| t.start());
    tracing::info!(
        task_id = id.0,
        upload_id = %session.upload_id,
        chunks = chunks.len(),
        max_concurrency,
        "upload started"
    );
    ctx.emit(Event::Started {
        id,
        chunks: chunks.len(),
    });

    let transport = Arc::clone(&ctx.transport);
    let send_part = |chunk: ChunkDescriptor, progress: ProgressCallback| {
        let source = Arc::clone(&source);
        let transport = Arc::clone(&transport);
        let session = Arc::clone(&session);
        async move {
            let data = source.read_chunk(&chunk).await?;
            transport
                .upload_part(&session, chunk.index, data, progress)
                .await
        }
    };

    let abort = handle.cancel_token().child_token();
    {
        let deadline = CallDeadline::Total(ctx.transfer.chunk_timeout);
        let mut results = chunk_stream(&ctx, &handle, &abort, &chunks, max_concurrency, deadline, &send_part);
        while let Some(result) = results.next().await {
            if let Err(e) = result {
                abort.cancel();
                return Err(settle_error(&handle, e));
            }
        }
    }

    if handle.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if !handle.snapshot().all_chunks_done() {
        return Err(Error::Other("upload ended with unfinished parts".to_string()));
    }

    let message = complete_session(&ctx, &handle, &session).await?;

    Ok(ObjectMetadata {
        bucket_name: session.bucket_name.clone(),
        object_name: session.object_name.clone(),
        content_type: session.content_type.clone(),
        size_bytes: total_size,
        message,
    })
}

/// Single attempt; any rejection is final
async fn open_session(
    ctx: &TransferContext,
    handle: &TaskHandle,
    request: &UploadRequest,
    content_type: &str,
) -> Result<UploadSession> {
    let call = timed(
        ctx.transfer.chunk_timeout,
        ctx.transport
            .init_multipart_upload(&request.bucket_name, &request.object_name, content_type),
    );

    let result = tokio::select! {
        biased;
        _ = handle.cancel_token().cancelled() => return Err(Error::Cancelled),
        result = call => result,
    };

    result.map_err(|e| {
        tracing::error!(task_id = handle.id().0, error = %e, "upload session rejected");
        Error::SessionInit(e.to_string())
    })
}

/// Finalize the upload under the same retry policy as the parts
async fn complete_session(
    ctx: &TransferContext,
    handle: &TaskHandle,
    session: &UploadSession,
) -> Result<Option<String>> {
    let id = handle.id();
    let attempt = |_: u32| timed(ctx.transfer.chunk_timeout, ctx.transport.upload_complete(session));
    let on_retry = |retry: u32, e: &Error| {
        tracing::warn!(task_id = id.0, attempt = retry, error = %e, "retrying upload completion");
    };

    let result = tokio::select! {
        biased;
        _ = handle.cancel_token().cancelled() => return Err(Error::Cancelled),
        result = with_retry(&ctx.retry, on_retry, attempt) => result,
    };

    result.map_err(|e| Error::Completion(e.to_string()))
}
