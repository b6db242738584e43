//! Transfer manager split into focused submodules.
//!
//! The `TransferManager` struct and its methods are organized by domain:
//! - [`transfers`] - Starting uploads and downloads, active-task tracking
//! - [`control`] - Cancellation, task queries and runtime speed limits
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod lifecycle;
mod transfers;


use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::Result;
use crate::orchestrator::{DownloadOrchestrator, TransferContext, UploadOrchestrator};
use crate::task::TaskHandle;
use crate::transport::{HttpTransport, TransferTransport};
use crate::types::{Event, TaskId};

/// Active-task registry
#[derive(Clone)]
pub(crate) struct TaskRegistry {
    /// Tasks started by this manager that have not been evicted yet
    pub(crate) active: Arc<tokio::sync::Mutex<HashMap<TaskId, TaskHandle>>>,
    /// Whether new transfers are accepted (cleared during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Main transfer manager (cloneable - all fields are Arc-wrapped)
///
/// Owns the transport, the event channel and the registry of active tasks.
/// Every transfer runs as its own tokio task; the manager only starts,
/// observes and cancels them.
#[derive(Clone)]
pub struct TransferManager {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Shared transport, limiter and event channel
    pub(crate) ctx: TransferContext,
    pub(crate) uploads: UploadOrchestrator,
    pub(crate) downloads: DownloadOrchestrator,
    pub(crate) registry: TaskRegistry,
}

impl TransferManager {
    /// Create a manager driving `transport`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is invalid.
    pub fn new(config: Config, transport: Arc<dyn TransferTransport>) -> Result<Self> {
        config.validate()?;

        let ctx = TransferContext::new(transport, &config);
        tracing::info!(
            chunk_size_bytes = config.transfer.chunk_size_bytes,
            max_concurrency = config.transfer.max_concurrency,
            max_attempts = config.retry.max_attempts,
            speed_limit_bps = ?config.transfer.speed_limit_bps,
            "transfer manager initialized"
        );

        let registry = TaskRegistry {
            active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        Ok(Self {
            config: Arc::new(config),
            uploads: UploadOrchestrator::new(ctx.clone()),
            downloads: DownloadOrchestrator::new(ctx.clone()),
            ctx,
            registry,
        })
    }

    /// Create a manager talking to the HTTP backend configured in `config.endpoint`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use cloud_transfer::{Config, StaticToken, TransferManager};
    ///
    /// # fn example() -> cloud_transfer::Result<()> {
    /// let mut config = Config::default();
    /// config.endpoint.base_url = "https://storage.example.com".to_string();
    ///
    /// let manager = TransferManager::with_http(config, Arc::new(StaticToken::new("secret")))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_http(config: Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let transport = HttpTransport::new(&config.endpoint, credentials)?;
        Self::new(config, Arc::new(transport))
    }

    /// Subscribe to transfer events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events
    /// independently. A subscriber that falls behind by more than
    /// `event_buffer` events receives a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.ctx.subscribe()
    }

    /// Transfer events as a stream
    ///
    /// Lagged gaps are logged and skipped.
    pub fn event_stream(&self) -> impl tokio_stream::Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
                None
            }
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub(crate) fn emit_event(&self, event: Event) {
        self.ctx.emit(event);
    }
}

impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
