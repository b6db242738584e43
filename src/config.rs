//! Configuration types for cloud-transfer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chunking, concurrency and task lifetime settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Default chunk size in bytes (default: 5 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,

    /// Default number of concurrent chunk workers per task (default: 4)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout applied to every single transport call (default: 60 seconds)
    ///
    /// A timeout counts as a transport failure and consumes one retry attempt.
    #[serde(default = "default_chunk_timeout", with = "duration_serde")]
    pub chunk_timeout: Duration,

    /// How long a finished task stays visible before eviction (default: 30 seconds)
    #[serde(default = "default_eviction_grace", with = "duration_serde")]
    pub eviction_grace: Duration,

    /// Global bandwidth limit in bytes per second (None = unlimited)
    #[serde(default)]
    pub speed_limit_bps: Option<u64>,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            chunk_timeout: default_chunk_timeout(),
            eviction_grace: default_eviction_grace(),
            speed_limit_bps: None,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Retry behavior for chunk transport calls and the completion call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of calls per chunk, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Backend endpoint layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Gateway base URL (default: "http://localhost:75")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path prefix of the upload service (default: "/fu")
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,

    /// Path prefix of the download service (default: "/fd")
    #[serde(default = "default_download_prefix")]
    pub download_prefix: String,

    /// Whether the download service honors `Range` requests (default: true)
    ///
    /// When false, downloads fall back to a single whole-object fetch.
    #[serde(default = "default_true")]
    pub range_requests: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            upload_prefix: default_upload_prefix(),
            download_prefix: default_download_prefix(),
            range_requests: true,
        }
    }
}

/// Main configuration for [`TransferManager`](crate::TransferManager)
///
/// Every section has defaults, so an empty JSON object is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chunking, concurrency and task lifetime settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Retry policy for transport calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backend endpoint layout
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

impl Config {
    /// Check the configuration for values the orchestrators cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size_bytes == 0 {
            return Err(config_error(
                "chunk size must be greater than zero",
                "chunk_size_bytes",
            ));
        }
        if i64::try_from(self.transfer.chunk_size_bytes).is_err() {
            return Err(config_error("chunk size is too large", "chunk_size_bytes"));
        }
        if self.transfer.max_concurrency == 0 {
            return Err(config_error(
                "at least one concurrent worker is required",
                "max_concurrency",
            ));
        }
        if self.transfer.event_buffer == 0 {
            return Err(config_error(
                "event buffer must hold at least one event",
                "event_buffer",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "at least one attempt is required",
                "max_attempts",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff multiplier must be a finite value >= 1.0",
                "backoff_multiplier",
            ));
        }
        url::Url::parse(&self.endpoint.base_url)?;
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_max_concurrency() -> usize {
    4
}

fn default_chunk_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_eviction_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_event_buffer() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:75".to_string()
}

fn default_upload_prefix() -> String {
    "/fu".to_string()
}

fn default_download_prefix() -> String {
    "/fd".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
