//! Error types for cloud-transfer
//!
//! This module provides the error handling for the library, including:
//! - The main [`Error`] enum returned by planning, transport and orchestration code
//! - [`TransferErrorKind`], the machine-readable classification attached to failed tasks
//! - [`TaskError`], the kind + message pair a failed task carries for display

use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for cloud-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cloud-transfer
///
/// Each variant includes contextual information to help diagnose issues.
/// Use [`Error::kind`] to get the coarse classification that is attached to a
/// failed [`TransferTask`](crate::task::TransferTask).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size_bytes")
        key: Option<String>,
    },

    /// Planning input was out of range (negative total or non-positive chunk size)
    #[error("invalid size: total {total_size_bytes} bytes, chunk {chunk_size_bytes} bytes")]
    InvalidSize {
        /// Requested total payload size
        total_size_bytes: i64,
        /// Requested chunk size
        chunk_size_bytes: i64,
    },

    /// The backend refused to open a multipart upload session
    #[error("failed to open upload session: {0}")]
    SessionInit(String),

    /// A chunk failed on every attempt of its retry budget
    #[error("chunk {index} failed after {attempts} attempts: {message}")]
    ChunkTransport {
        /// Index of the chunk that failed (1-based)
        index: u32,
        /// Number of transport calls made for the chunk
        attempts: u32,
        /// Message of the last failure
        message: String,
    },

    /// The finalize step failed after every chunk was done
    #[error("failed to complete transfer: {0}")]
    Completion(String),

    /// The transfer was cancelled by the caller
    #[error("transfer cancelled")]
    Cancelled,

    /// A single transport call was rejected by the backend
    #[error("transport error (status {status:?}): {message}")]
    Transport {
        /// HTTP status code (or envelope code) when one was available
        status: Option<u16>,
        /// Message reported by the backend or the transport
        message: String,
    },

    /// A single transport call did not finish in time
    #[error("transport call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected the bearer credential
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Message reported by the backend
        message: String,
        /// Whether the credential provider may hand out a different token
        refreshable: bool,
    },

    /// A ranged fetch returned a payload of the wrong length
    #[error("chunk {index} returned {actual} bytes, expected {expected}")]
    LengthMismatch {
        /// Index of the chunk (1-based)
        index: u32,
        /// Expected payload length
        expected: u64,
        /// Received payload length
        actual: u64,
    },

    /// A ranged fetch was answered without `206 Partial Content`
    #[error("chunk {index}: backend ignored the Range header (status {status})")]
    RangeNotHonored {
        /// Index of the chunk (1-based)
        index: u32,
        /// Status the backend answered with
        status: u16,
    },

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed endpoint URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Task not found in the active set
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Shutdown in progress - not accepting new transfers
    #[error("shutdown in progress: not accepting new transfers")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse error classification attached to a failed task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorKind {
    /// Bad planning input, not retryable
    InvalidSize,
    /// Backend rejected the upload session, not retryable
    SessionInit,
    /// Per-chunk transport failure after the retry budget
    ChunkTransport,
    /// Finalize step failed
    Completion,
    /// User-initiated cancellation, not a fault
    Cancelled,
    /// Local failure unrelated to the transfer protocol (config, I/O, shutdown)
    Internal,
}

impl Error {
    /// Classify this error for display on a failed task
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            Error::InvalidSize { .. } => TransferErrorKind::InvalidSize,
            Error::SessionInit(_) => TransferErrorKind::SessionInit,
            Error::ChunkTransport { .. }
            | Error::Transport { .. }
            | Error::Timeout(_)
            | Error::Unauthorized { .. }
            | Error::LengthMismatch { .. }
            | Error::RangeNotHonored { .. }
            | Error::Network(_) => TransferErrorKind::ChunkTransport,
            Error::Completion(_) => TransferErrorKind::Completion,
            Error::Cancelled => TransferErrorKind::Cancelled,
            Error::Config { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::InvalidUrl(_)
            | Error::NotFound(_)
            | Error::ShuttingDown
            | Error::Other(_) => TransferErrorKind::Internal,
        }
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::InvalidSize { .. } => "invalid_size",
            Error::SessionInit(_) => "session_init_failed",
            Error::ChunkTransport { .. } => "chunk_transport_failed",
            Error::Completion(_) => "completion_failed",
            Error::Cancelled => "cancelled",
            Error::Transport { .. } => "transport_error",
            Error::Timeout(_) => "timeout",
            Error::Unauthorized { .. } => "unauthorized",
            Error::LengthMismatch { .. } => "length_mismatch",
            Error::RangeNotHonored { .. } => "range_not_honored",
            Error::Network(_) => "network_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidUrl(_) => "invalid_url",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Error details carried by a failed task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Classification of the last error
    pub kind: TransferErrorKind,
    /// Human-readable message of the last error
    pub message: String,
}

impl From<&Error> for TaskError {
    fn from(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_level_errors_classify_as_chunk_transport() {
        let cases = [
            Error::Transport {
                status: Some(503),
                message: "busy".to_string(),
            },
            Error::Timeout(Duration::from_secs(1)),
            Error::Unauthorized {
                message: "expired".to_string(),
                refreshable: true,
            },
            Error::RangeNotHonored {
                index: 1,
                status: 200,
            },
            Error::LengthMismatch {
                index: 2,
                expected: 10,
                actual: 4,
            },
            Error::ChunkTransport {
                index: 1,
                attempts: 3,
                message: "reset".to_string(),
            },
        ];

        for error in cases {
            assert_eq!(
                error.kind(),
                TransferErrorKind::ChunkTransport,
                "{error} should be a chunk transport failure"
            );
        }
    }

    #[test]
    fn lifecycle_errors_keep_their_own_kind() {
        assert_eq!(
            Error::InvalidSize {
                total_size_bytes: -1,
                chunk_size_bytes: 10
            }
            .kind(),
            TransferErrorKind::InvalidSize
        );
        assert_eq!(
            Error::SessionInit("bucket missing".to_string()).kind(),
            TransferErrorKind::SessionInit
        );
        assert_eq!(
            Error::Completion("no parts".to_string()).kind(),
            TransferErrorKind::Completion
        );
        assert_eq!(Error::Cancelled.kind(), TransferErrorKind::Cancelled);
        assert_eq!(Error::ShuttingDown.kind(), TransferErrorKind::Internal);
    }

    #[test]
    fn task_error_captures_kind_and_message() {
        let error = Error::SessionInit("bucket does not exist".to_string());
        let task_error = TaskError::from(&error);

        assert_eq!(task_error.kind, TransferErrorKind::SessionInit);
        assert_eq!(
            task_error.message,
            "failed to open upload session: bucket does not exist"
        );
    }

    #[test]
    fn error_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&TransferErrorKind::ChunkTransport).unwrap();
        assert_eq!(json, "\"chunk_transport\"");
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(Error::Cancelled.error_code(), "cancelled");
        assert_eq!(Error::ShuttingDown.error_code(), "shutting_down");
        assert_eq!(
            Error::Completion(String::new()).error_code(),
            "completion_failed"
        );
    }
}
