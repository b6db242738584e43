//! # cloud-transfer
//!
//! Chunked multipart upload and ranged download orchestration for
//! bucket/object storage backends.
//!
//! ## Design Philosophy
//!
//! cloud-transfer is designed to be:
//! - **Concurrent** - Chunks move through a bounded per-task worker pool
//! - **Resilient** - Every chunk call is retried with exponential backoff
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events and task handles, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloud_transfer::{Config, DownloadRequest, StaticToken, TransferManager, UploadRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.endpoint.base_url = "https://storage.example.com".to_string();
//!
//!     let manager = TransferManager::with_http(config, Arc::new(StaticToken::new("token")))?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let upload = manager
//!         .upload_file("backup.tar.gz", UploadRequest::new("archive", "2024/backup.tar.gz"))
//!         .await?;
//!     let metadata = upload.wait().await?;
//!
//!     let download = manager
//!         .download(DownloadRequest::new("archive", "2024/backup.tar.gz", metadata.size_bytes as i64))
//!         .await?;
//!     let bytes = download.wait().await?;
//!     println!("round-tripped {} bytes", bytes.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Content-type inference from object names
pub mod content_type;
/// Bearer credential providers
pub mod credentials;
/// Error types
pub mod error;
/// Transfer manager (decomposed into focused submodules)
pub mod manager;
/// Upload and download orchestration
pub mod orchestrator;
/// Chunk planning
pub mod planner;
/// Progress computation
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Upload payload sources
pub mod source;
/// Speed limiting with token bucket
pub mod speed_limiter;
/// Transfer task state and handles
pub mod task;
/// Storage backend transport
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, EndpointConfig, RetryConfig, TransferConfig};
pub use credentials::{CredentialProvider, SharedToken, StaticToken};
pub use error::{Error, Result, TaskError, TransferErrorKind};
pub use manager::TransferManager;
pub use orchestrator::{
    DownloadOrchestrator, DownloadRequest, TransferContext, TransferJob, UploadOrchestrator,
    UploadRequest,
};
pub use planner::{ChunkDescriptor, plan};
pub use progress::{Progress, ProgressAggregator};
pub use source::{ChunkSource, FileSource};
pub use speed_limiter::SpeedLimiter;
pub use task::{ChunkState, TaskHandle, TransferTask};
pub use transport::{HttpTransport, TransferTransport};
pub use types::{
    ChunkStatus, Event, ObjectMetadata, TaskId, TaskStatus, TransferKind, UploadSession,
};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal and then calls the manager's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cloud_transfer::{Config, StaticToken, TransferManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = TransferManager::with_http(Config::default(), Arc::new(StaticToken::anonymous()))?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(manager).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: TransferManager) {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
    }
}
