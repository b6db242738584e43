//! Starting transfers and tracking them until eviction.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use tokio::io::AsyncWrite;

use super::TransferManager;
use crate::error::{Error, Result};
use crate::orchestrator::{DownloadRequest, TransferJob, UploadRequest};
use crate::source::{ChunkSource, FileSource};
use crate::task::TaskHandle;
use crate::types::{Event, ObjectMetadata};

impl TransferManager {
    /// Start a multipart upload of `source`
    ///
    /// Returns as soon as the task is registered; the upload itself runs in the
    /// background. Await [`TransferJob::wait`] for the result or observe the
    /// task through its handle and the event channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) was called.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use bytes::Bytes;
    /// # use cloud_transfer::{TransferManager, UploadRequest};
    /// # async fn example(manager: TransferManager) -> cloud_transfer::Result<()> {
    /// let job = manager
    ///     .upload(
    ///         Arc::new(Bytes::from_static(b"hello")),
    ///         UploadRequest::new("reports", "2024/q1.txt"),
    ///     )
    ///     .await?;
    /// let metadata = job.wait().await?;
    /// println!("stored {} ({})", metadata.object_name, metadata.content_type);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn upload(
        &self,
        source: Arc<dyn ChunkSource>,
        request: UploadRequest,
    ) -> Result<TransferJob<ObjectMetadata>> {
        self.ensure_accepting()?;
        let job = self.uploads.start_upload(source, request);
        self.track(job.handle()).await;
        Ok(job)
    }

    /// Start a multipart upload of the file at `path`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened, or
    /// [`Error::ShuttingDown`] during shutdown.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        request: UploadRequest,
    ) -> Result<TransferJob<ObjectMetadata>> {
        self.ensure_accepting()?;
        let source = FileSource::open(path).await?;
        self.upload(Arc::new(source), request).await
    }

    /// Start a chunked download into memory
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) was called.
    pub async fn download(&self, request: DownloadRequest) -> Result<TransferJob<Bytes>> {
        self.ensure_accepting()?;
        let job = self.downloads.start_download(request);
        self.track(job.handle()).await;
        Ok(job)
    }

    /// Start a chunked download streamed into `writer` in byte order
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) was called.
    pub async fn download_to<W>(&self, request: DownloadRequest, writer: W) -> Result<TransferJob<u64>>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.ensure_accepting()?;
        let job = self.downloads.start_download_to(request, writer);
        self.track(job.handle()).await;
        Ok(job)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.registry.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Register `handle` and evict it `eviction_grace` after it finished
    async fn track(&self, handle: &TaskHandle) {
        self.registry
            .active
            .lock()
            .await
            .insert(handle.id(), handle.clone());

        let manager = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let finished = handle.wait().await;
            tokio::time::sleep(manager.config.transfer.eviction_grace).await;

            let removed = manager.registry.active.lock().await.remove(&finished.id);
            if removed.is_some() {
                tracing::debug!(task_id = finished.id.0, status = ?finished.status, "task evicted");
                manager.emit_event(Event::Evicted { id: finished.id });
            }
        });
    }
}
