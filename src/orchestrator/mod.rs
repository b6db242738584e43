//! Upload and download orchestration
//!
//! Each transfer runs as its own tokio task:
//! - `upload` - session init, concurrent part upload, completion
//! - `download` - ranged fetch (or whole-object fallback) and ordered reassembly
//! - `workers` - the bounded chunk worker pool shared by both directions
//! - `reassembly` - low-water-mark buffering of out-of-order chunk payloads
//! - `background` - periodic progress events

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetryConfig, TransferConfig};
use crate::error::{Error, Result};
use crate::speed_limiter::SpeedLimiter;
use crate::task::TaskHandle;
use crate::transport::TransferTransport;
use crate::types::{Event, TaskId, TaskStatus};

mod background;
mod download;
mod reassembly;
mod upload;
mod workers;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use download::DownloadOrchestrator;
pub use reassembly::Reassembler;
pub use upload::UploadOrchestrator;

/// Parameters of a multipart upload
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Target bucket
    pub bucket_name: String,
    /// Target object path
    pub object_name: String,
    /// MIME type; inferred from the object name when `None`
    #[serde(default)]
    pub content_type: Option<String>,
    /// Chunk size override (defaults to the configured chunk size)
    #[serde(default)]
    pub chunk_size_bytes: Option<i64>,
    /// Worker count override (defaults to the configured concurrency)
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl UploadRequest {
    /// Upload to `bucket_name/object_name` with default settings
    pub fn new(bucket_name: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            object_name: object_name.into(),
            ..Self::default()
        }
    }

    /// Set an explicit content type
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Override the chunk size
    pub fn chunk_size(mut self, chunk_size_bytes: i64) -> Self {
        self.chunk_size_bytes = Some(chunk_size_bytes);
        self
    }

    /// Override the number of concurrent chunk workers
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }
}

/// Parameters of a chunked download
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source bucket
    pub bucket_name: String,
    /// Source object path
    pub object_name: String,
    /// Object size as reported by the backend listing
    pub total_size_bytes: i64,
    /// Chunk size override (defaults to the configured chunk size)
    #[serde(default)]
    pub chunk_size_bytes: Option<i64>,
    /// Worker count override (defaults to the configured concurrency)
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl DownloadRequest {
    /// Download `bucket_name/object_name` of `total_size_bytes` with default settings
    pub fn new(
        bucket_name: impl Into<String>,
        object_name: impl Into<String>,
        total_size_bytes: i64,
    ) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            object_name: object_name.into(),
            total_size_bytes,
            ..Self::default()
        }
    }

    /// Override the chunk size
    pub fn chunk_size(mut self, chunk_size_bytes: i64) -> Self {
        self.chunk_size_bytes = Some(chunk_size_bytes);
        self
    }

    /// Override the number of concurrent chunk workers
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }
}

/// Shared dependencies of the orchestrators
///
/// Cheap to clone; every clone shares the transport, limiter, event channel,
/// ID counter and shutdown token.
#[derive(Clone)]
pub struct TransferContext {
    transport: Arc<dyn TransferTransport>,
    transfer: TransferConfig,
    retry: RetryConfig,
    speed_limiter: SpeedLimiter,
    event_tx: broadcast::Sender<Event>,
    shutdown_token: CancellationToken,
    next_id: Arc<AtomicU64>,
}

impl TransferContext {
    /// Create a context driving `transport` with the given settings
    pub fn new(transport: Arc<dyn TransferTransport>, config: &Config) -> Self {
        let (event_tx, _rx) = broadcast::channel(config.transfer.event_buffer.max(1));
        Self {
            transport,
            transfer: config.transfer.clone(),
            retry: config.retry.clone(),
            speed_limiter: SpeedLimiter::new(config.transfer.speed_limit_bps),
            event_tx,
            shutdown_token: CancellationToken::new(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to lifecycle and progress events of every transfer
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Bandwidth limiter shared by all transfers of this context
    pub fn speed_limiter(&self) -> &SpeedLimiter {
        &self.speed_limiter
    }

    /// Cancel every transfer started from this context
    pub fn cancel_all(&self) {
        self.shutdown_token.cancel();
    }

    pub(crate) fn emit(&self, event: Event) {
        // No receivers is fine
        self.event_tx.send(event).ok();
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Per-task cancellation token, cancelled by [`cancel_all`](Self::cancel_all) too
    fn task_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    /// Chunk size and worker count for a request, falling back to the configuration
    fn resolve(&self, chunk_size_bytes: Option<i64>, max_concurrency: Option<usize>) -> (i64, usize) {
        let chunk_size = chunk_size_bytes
            .unwrap_or_else(|| i64::try_from(self.transfer.chunk_size_bytes).unwrap_or(i64::MAX));
        let concurrency = max_concurrency
            .unwrap_or(self.transfer.max_concurrency)
            .max(1);
        (chunk_size, concurrency)
    }

    /// Run `work` as the body of the task behind `handle`
    ///
    /// Spawns the progress reporter alongside and moves the task to its terminal
    /// status from the outcome. The body runs in its own task so a panic still
    /// leaves the handle `Failed`.
    fn launch<T, F>(&self, handle: TaskHandle, work: F) -> TransferJob<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let ctx = self.clone();
        let task_handle = handle.clone();
        let join = tokio::spawn(async move {
            let stop_reporter = task_handle.cancel_token().child_token();
            let _reporter = background::spawn_progress_reporter(
                task_handle.clone(),
                ctx.event_tx.clone(),
                stop_reporter.clone(),
            );

            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(e) => Err(Error::Other(format!("transfer task aborted: {e}"))),
            };
            stop_reporter.cancel();
            ctx.finalize(&task_handle, &result);
            result
        });

        TransferJob { handle, join }
    }

    fn finalize<T>(&self, handle: &TaskHandle, result: &Result<T>) {
        let id = handle.id();
        match result {
            Ok(_) => {
                if handle.update(|t| t.finish(TaskStatus::Completed, None)) {
                    tracing::info!(task_id = id.0, "transfer completed");
                    self.emit(Event::Completed { id });
                }
            }
            Err(Error::Cancelled) => {
                if handle.update(|t| t.finish(TaskStatus::Cancelled, Some(&Error::Cancelled))) {
                    tracing::info!(task_id = id.0, "transfer cancelled");
                    self.emit(Event::Cancelled { id });
                }
            }
            Err(e) => {
                if handle.update(|t| t.finish(TaskStatus::Failed, Some(e))) {
                    tracing::error!(task_id = id.0, kind = ?e.kind(), error = %e, "transfer failed");
                    self.emit(Event::Failed {
                        id,
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("transfer", &self.transfer)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// A running transfer: its observable handle plus the eventual result
///
/// Dropping the job detaches it; the transfer keeps running and stays
/// observable through its handle.
#[derive(Debug)]
pub struct TransferJob<T> {
    handle: TaskHandle,
    join: JoinHandle<Result<T>>,
}

impl<T> TransferJob<T> {
    /// Task ID
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    /// Observable handle of the task
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the transfer to finish and return its result
    pub async fn wait(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                let error = Error::Other(format!("transfer task aborted: {e}"));
                self.handle
                    .update(|t| t.finish(TaskStatus::Failed, Some(&error)));
                Err(error)
            }
        }
    }
}
