//! Core types for cloud-transfer

use serde::{Deserialize, Serialize};

use crate::error::TransferErrorKind;

/// Unique identifier for a transfer task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Direction of a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Multipart upload to the backend
    Upload,
    /// Ranged (or whole-object) download from the backend
    Download,
}

/// Lifecycle status of a transfer task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, nothing sent yet
    Pending,
    /// Chunks are being transferred
    InProgress,
    /// Every chunk transferred and the finalize step succeeded
    Completed,
    /// Gave up after an unrecoverable error
    Failed,
    /// Stopped by the caller
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Status of a single chunk within a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Not dispatched yet
    Pending,
    /// A transport call for this chunk is running
    InFlight,
    /// Transferred successfully
    Done,
    /// Gave up after the retry budget
    Failed,
}

/// Server-correlated multipart upload session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Opaque token issued by the backend
    pub upload_id: String,
    /// Target bucket
    pub bucket_name: String,
    /// Target object path
    pub object_name: String,
    /// MIME type recorded for the object
    pub content_type: String,
}

/// Metadata of an object after a completed multipart upload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Bucket the object lives in
    pub bucket_name: String,
    /// Object path
    pub object_name: String,
    /// MIME type recorded for the object
    pub content_type: String,
    /// Total object size in bytes
    pub size_bytes: u64,
    /// Message returned by the backend, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Event emitted during the transfer lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task registered with the manager
    Queued {
        /// Task ID
        id: TaskId,
        /// Upload or download
        kind: TransferKind,
        /// Bucket name
        bucket_name: String,
        /// Object name
        object_name: String,
        /// Total payload size in bytes
        total_size_bytes: u64,
    },

    /// Chunks are about to be dispatched
    Started {
        /// Task ID
        id: TaskId,
        /// Number of planned chunks
        chunks: usize,
    },

    /// Periodic progress update
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
        /// Bytes transferred so far
        bytes_transferred: u64,
        /// Average speed in bytes per second
        speed_bps: u64,
    },

    /// A chunk finished transferring
    ChunkCompleted {
        /// Task ID
        id: TaskId,
        /// Chunk index (1-based)
        index: u32,
        /// Chunk size in bytes
        size_bytes: u64,
    },

    /// A chunk failed and will be retried
    ChunkRetrying {
        /// Task ID
        id: TaskId,
        /// Chunk index (1-based)
        index: u32,
        /// Retry number (1 for the first retry)
        attempt: u32,
        /// Error that triggered the retry
        error: String,
    },

    /// Transfer finished successfully
    Completed {
        /// Task ID
        id: TaskId,
    },

    /// Transfer failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Error classification
        kind: TransferErrorKind,
        /// Error message
        error: String,
    },

    /// Transfer cancelled by the caller
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Finished task removed from the active set
    Evicted {
        /// Task ID
        id: TaskId,
    },
}

impl Event {
    /// The task this event refers to
    pub fn task_id(&self) -> TaskId {
        match self {
            Event::Queued { id, .. }
            | Event::Started { id, .. }
            | Event::Progress { id, .. }
            | Event::ChunkCompleted { id, .. }
            | Event::ChunkRetrying { id, .. }
            | Event::Completed { id }
            | Event::Failed { id, .. }
            | Event::Cancelled { id }
            | Event::Evicted { id } => *id,
        }
    }
}
