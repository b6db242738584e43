//! Scripted in-memory backend for orchestrator and manager tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::TransferContext;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::planner::ChunkDescriptor;
use crate::transport::{ProgressCallback, TransferTransport};
use crate::types::UploadSession;

/// Scripted failure for one chunk index
#[derive(Clone, Copy, Debug)]
struct Script {
    remaining: u32,
    status: u16,
}

/// In-memory backend with per-chunk delays and scripted failures
///
/// Uploaded parts are stored by part number; downloads are served from `object`.
#[derive(Default)]
pub(crate) struct MockTransport {
    object: Bytes,
    no_ranges: bool,
    ignore_ranges: bool,
    trickle: Option<(u32, Duration)>,
    fail_init: bool,
    complete_failures: AtomicU32,
    scripts: Mutex<HashMap<u32, Script>>,
    delays: HashMap<u32, Duration>,

    pub init_calls: AtomicU32,
    pub complete_calls: AtomicU32,
    pub file_calls: AtomicU32,
    part_calls: Mutex<HashMap<u32, u32>>,
    completion_order: Mutex<Vec<u32>>,
    init_content_types: Mutex<Vec<String>>,
    parts: Mutex<BTreeMap<u32, Bytes>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serve `object` for downloads
    pub(crate) fn with_object(mut self, object: impl Into<Bytes>) -> Self {
        self.object = object.into();
        self
    }

    /// Report no range support so downloads take the whole-object path
    pub(crate) fn without_ranges(mut self) -> Self {
        self.no_ranges = true;
        self
    }

    /// Claim range support but answer ranged calls with the whole object
    pub(crate) fn ignoring_ranges(mut self) -> Self {
        self.ignore_ranges = true;
        self
    }

    /// Stream the whole object in `steps` progress reports, `interval` apart
    pub(crate) fn trickling_file(mut self, steps: u32, interval: Duration) -> Self {
        self.trickle = Some((steps, interval));
        self
    }

    /// Reject the session init call
    pub(crate) fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Fail the completion call `times` times with a 503
    pub(crate) fn failing_complete(self, times: u32) -> Self {
        self.complete_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Fail chunk `index` the next `times` calls (`u32::MAX` = always) with `status`
    pub(crate) fn failing_chunk(self, index: u32, times: u32, status: u16) -> Self {
        self.scripts.lock().unwrap().insert(
            index,
            Script {
                remaining: times,
                status,
            },
        );
        self
    }

    /// Hold chunk `index` for `delay` before answering
    pub(crate) fn delaying_chunk(mut self, index: u32, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    /// Transport calls made for chunk `index` (part or range)
    pub(crate) fn chunk_calls(&self, index: u32) -> u32 {
        self.part_calls.lock().unwrap().get(&index).copied().unwrap_or(0)
    }

    /// Transport calls made for all chunks
    pub(crate) fn total_chunk_calls(&self) -> u32 {
        self.part_calls.lock().unwrap().values().sum()
    }

    /// Chunk indexes in the order their calls succeeded
    pub(crate) fn completion_order(&self) -> Vec<u32> {
        self.completion_order.lock().unwrap().clone()
    }

    /// Content types passed to session init
    pub(crate) fn init_content_types(&self) -> Vec<String> {
        self.init_content_types.lock().unwrap().clone()
    }

    /// Uploaded parts ordered by part number
    pub(crate) fn parts(&self) -> BTreeMap<u32, Bytes> {
        self.parts.lock().unwrap().clone()
    }

    /// Shared chunk behavior: count, delay, scripted failure
    async fn chunk_call(&self, index: u32) -> Result<()> {
        *self.part_calls.lock().unwrap().entry(index).or_insert(0) += 1;

        if let Some(delay) = self.delays.get(&index) {
            tokio::time::sleep(*delay).await;
        }

        let failure = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&index) {
                Some(script) if script.remaining > 0 => {
                    if script.remaining != u32::MAX {
                        script.remaining -= 1;
                    }
                    Some(script.status)
                }
                _ => None,
            }
        };
        if let Some(status) = failure {
            return Err(Error::Transport {
                status: Some(status),
                message: format!("scripted failure for chunk {index}"),
            });
        }

        self.completion_order.lock().unwrap().push(index);
        Ok(())
    }
}

#[async_trait]
impl TransferTransport for MockTransport {
    async fn init_multipart_upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        content_type: &str,
    ) -> Result<UploadSession> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.init_content_types
            .lock()
            .unwrap()
            .push(content_type.to_string());
        if self.fail_init {
            return Err(Error::Transport {
                status: Some(404),
                message: "bucket does not exist".to_string(),
            });
        }
        Ok(UploadSession {
            upload_id: "mock-upload".to_string(),
            bucket_name: bucket_name.to_string(),
            object_name: object_name.to_string(),
            content_type: content_type.to_string(),
        })
    }

    async fn upload_part(
        &self,
        _session: &UploadSession,
        part_number: u32,
        data: Bytes,
        progress: ProgressCallback,
    ) -> Result<()> {
        progress(data.len() as u64 / 2);
        self.chunk_call(part_number).await?;
        progress(data.len() as u64);
        self.parts.lock().unwrap().insert(part_number, data);
        Ok(())
    }

    async fn upload_complete(&self, _session: &UploadSession) -> Result<Option<String>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.complete_failures.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.complete_failures.store(left - 1, Ordering::SeqCst);
            }
            return Err(Error::Transport {
                status: Some(503),
                message: "merge failed".to_string(),
            });
        }
        if self.parts.lock().unwrap().is_empty() {
            return Err(Error::Transport {
                status: Some(404),
                message: "no parts found for upload".to_string(),
            });
        }
        Ok(Some("upload assembled".to_string()))
    }

    async fn download_part(
        &self,
        _bucket_name: &str,
        _object_name: &str,
        chunk: &ChunkDescriptor,
        progress: ProgressCallback,
    ) -> Result<Bytes> {
        if self.ignore_ranges && !(chunk.start_offset == 0 && chunk.size_bytes == self.object.len() as u64) {
            *self.part_calls.lock().unwrap().entry(chunk.index).or_insert(0) += 1;
            return Err(Error::RangeNotHonored {
                index: chunk.index,
                status: 200,
            });
        }
        self.chunk_call(chunk.index).await?;
        let start = chunk.start_offset as usize;
        let end = start + chunk.size_bytes as usize;
        let body = self.object.slice(start..end.min(self.object.len()));
        progress(body.len() as u64);
        Ok(body)
    }

    async fn download_file(
        &self,
        _bucket_name: &str,
        _object_name: &str,
        progress: ProgressCallback,
    ) -> Result<Bytes> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((steps, interval)) = self.trickle {
            let total = self.object.len() as u64;
            for step in 1..=steps {
                tokio::time::sleep(interval).await;
                progress(total * u64::from(step) / u64::from(steps));
            }
        }
        self.chunk_call(1).await?;
        progress(self.object.len() as u64);
        Ok(self.object.clone())
    }

    fn supports_range_requests(&self) -> bool {
        !self.no_ranges
    }
}

/// Configuration with millisecond retry delays
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config
}

/// Context around `mock` with `config`
pub(crate) fn context_with(mock: &Arc<MockTransport>, config: &Config) -> TransferContext {
    TransferContext::new(mock.clone(), config)
}

/// Deterministic payload of `len` bytes
pub(crate) fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}
