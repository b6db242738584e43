//! Bounded chunk worker pool shared by uploads and downloads.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::TransferContext;
use crate::error::{Error, Result};
use crate::planner::ChunkDescriptor;
use crate::retry::with_retry;
use crate::task::TaskHandle;
use crate::transport::ProgressCallback;
use crate::types::Event;

/// Run one transport call under `limit`; running out of time is a transport failure
pub(crate) async fn timed<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout(limit))?
}

/// How long a single chunk call may run
#[derive(Clone, Copy, Debug)]
pub(crate) enum CallDeadline {
    /// The call must finish within the limit
    Total(Duration),
    /// The call fails once it reports no progress for the limit
    Idle(Duration),
}

/// Run one transport call that fails once `activity` has not moved for `limit`
pub(crate) async fn timed_idle<T>(
    limit: Duration,
    activity: &Mutex<Instant>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let last_seen = || *activity.lock().unwrap_or_else(PoisonError::into_inner);
    tokio::pin!(call);
    loop {
        tokio::select! {
            result = &mut call => return result,
            _ = tokio::time::sleep_until(last_seen() + limit) => {
                if last_seen().elapsed() >= limit {
                    return Err(Error::Timeout(limit));
                }
            }
        }
    }
}

/// Dispatch `chunks` in ascending index order with at most `max_concurrency`
/// transport calls in flight. Results arrive in completion order.
///
/// Once `abort` is cancelled no further chunk is dispatched and in-flight calls
/// resolve to [`Error::Cancelled`].
pub(crate) fn chunk_stream<'a, F, Fut, T>(
    ctx: &'a TransferContext,
    handle: &'a TaskHandle,
    abort: &'a CancellationToken,
    chunks: &'a [ChunkDescriptor],
    max_concurrency: usize,
    deadline: CallDeadline,
    call: &'a F,
) -> impl Stream<Item = Result<(ChunkDescriptor, T)>> + 'a
where
    F: Fn(ChunkDescriptor, ProgressCallback) -> Fut,
    Fut: Future<Output = Result<T>> + 'a,
    T: 'a,
{
    futures::stream::iter(chunks.iter().copied())
        .map(move |chunk| run_chunk(ctx, handle, abort, chunk, deadline, call))
        .buffer_unordered(max_concurrency.max(1))
}

async fn run_chunk<F, Fut, T>(
    ctx: &TransferContext,
    handle: &TaskHandle,
    abort: &CancellationToken,
    chunk: ChunkDescriptor,
    deadline: CallDeadline,
    call: &F,
) -> Result<(ChunkDescriptor, T)>
where
    F: Fn(ChunkDescriptor, ProgressCallback) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if abort.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let id = handle.id();
    let index = chunk.index;
    handle.update(|t| t.mark_in_flight(index));
    tracing::debug!(task_id = id.0, chunk = index, size_bytes = chunk.size_bytes, "dispatching chunk");

    let calls = AtomicU32::new(0);
    let attempt = |n: u32| {
        calls.store(n, Ordering::Relaxed);
        let activity = Arc::new(Mutex::new(Instant::now()));
        let observer = handle.clone();
        let touched = Arc::clone(&activity);
        let progress: ProgressCallback = Arc::new(move |bytes| {
            *touched.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
            observer.update(|t| t.record_progress(index, bytes));
        });
        let pending = call(chunk, progress);
        async move {
            match deadline {
                CallDeadline::Total(limit) => timed(limit, pending).await,
                CallDeadline::Idle(limit) => timed_idle(limit, &activity, pending).await,
            }
        }
    };
    let on_retry = |retry: u32, e: &Error| {
        handle.update(|t| t.mark_retry(index));
        ctx.emit(Event::ChunkRetrying {
            id,
            index,
            attempt: retry,
            error: e.to_string(),
        });
    };

    let work = async {
        ctx.speed_limiter.acquire(chunk.size_bytes).await;
        with_retry(&ctx.retry, on_retry, attempt).await
    };

    let outcome = tokio::select! {
        biased;
        _ = abort.cancelled() => Err(Error::Cancelled),
        result = work => result,
    };

    match outcome {
        Ok(value) => {
            if handle.update(|t| t.mark_done(index)) {
                ctx.emit(Event::ChunkCompleted {
                    id,
                    index,
                    size_bytes: chunk.size_bytes,
                });
            }
            tracing::debug!(task_id = id.0, chunk = index, "chunk done");
            Ok((chunk, value))
        }
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            let attempts = calls.load(Ordering::Relaxed);
            handle.update(|t| t.mark_chunk_failed(index));
            tracing::error!(task_id = id.0, chunk = index, attempts, error = %e, "chunk failed");
            Err(Error::ChunkTransport {
                index,
                attempts,
                message: e.to_string(),
            })
        }
    }
}

/// Mark a zero-length chunk done without a transport call
pub(crate) fn complete_empty_chunk(ctx: &TransferContext, handle: &TaskHandle, chunk: &ChunkDescriptor) {
    let index = chunk.index;
    handle.update(|t| t.mark_in_flight(index));
    if handle.update(|t| t.mark_done(index)) {
        ctx.emit(Event::ChunkCompleted {
            id: handle.id(),
            index,
            size_bytes: 0,
        });
    }
}

/// The error a task should finish with once a chunk failed
///
/// A cancellation requested by the caller wins over whatever the workers saw.
pub(crate) fn settle_error(handle: &TaskHandle, error: Error) -> Error {
    if handle.is_cancelled() {
        Error::Cancelled
    } else {
        error
    }
}
