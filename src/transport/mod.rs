//! Transport seam between the orchestrators and the storage backend.
//!
//! Orchestrators only speak [`TransferTransport`]; the production implementation is
//! [`HttpTransport`], tests substitute a scripted in-memory backend. Every call is
//! stateless apart from the [`UploadSession`] token the backend hands out.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::planner::ChunkDescriptor;
use crate::types::UploadSession;

mod http;

pub use http::HttpTransport;

/// Progress observer for a single transport call
///
/// Receives the number of bytes of the current call transferred so far. Calls
/// are monotonic within one attempt.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Calls the orchestrators make against the storage backend
#[async_trait]
pub trait TransferTransport: Send + Sync {
    /// Open a multipart upload session for `bucket_name/object_name`
    async fn init_multipart_upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        content_type: &str,
    ) -> Result<UploadSession>;

    /// Send one part of a multipart upload. Part numbers start at 1.
    ///
    /// Re-sending the same part number overwrites the earlier part.
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
        progress: ProgressCallback,
    ) -> Result<()>;

    /// Assemble all uploaded parts into the final object
    ///
    /// Returns the backend's confirmation message, if any.
    async fn upload_complete(&self, session: &UploadSession) -> Result<Option<String>>;

    /// Fetch the byte range covered by `chunk`
    async fn download_part(
        &self,
        bucket_name: &str,
        object_name: &str,
        chunk: &ChunkDescriptor,
        progress: ProgressCallback,
    ) -> Result<Bytes>;

    /// Fetch the whole object in one call
    async fn download_file(
        &self,
        bucket_name: &str,
        object_name: &str,
        progress: ProgressCallback,
    ) -> Result<Bytes>;

    /// Whether [`download_part`](Self::download_part) is honored by the backend
    fn supports_range_requests(&self) -> bool {
        true
    }
}
