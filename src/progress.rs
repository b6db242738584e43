//! Overall progress computed from per-chunk byte counters.
//!
//! Progress is `sum(bytes_so_far) / total * 100`, clamped to `[0, 100]`. It only
//! moves forward, except when a chunk is retried: the retried chunk restarts
//! from zero bytes and the displayed percentage dips accordingly.

use std::time::Instant;

use crate::task::TransferTask;
use crate::types::ChunkStatus;

/// Progress percentage of a task in `[0, 100]`
///
/// An empty payload reports 100 once its single zero-length chunk is done.
pub fn percent_complete(task: &TransferTask) -> f32 {
    if task.total_size_bytes == 0 {
        let done = !task.chunks.is_empty()
            && task.chunks.iter().all(|c| c.status == ChunkStatus::Done);
        return if done { 100.0 } else { 0.0 };
    }

    let transferred: u64 = task.chunks.iter().map(|c| c.bytes_so_far).sum();
    let percent = (transferred as f64 / task.total_size_bytes as f64) * 100.0;
    percent.clamp(0.0, 100.0) as f32
}

/// A progress reading for display
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// Percentage in `[0, 100]`
    pub percent: f32,
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Average throughput since the aggregator was created, in bytes per second
    pub speed_bps: u64,
}

/// Computes progress readings for one task
#[derive(Clone, Copy, Debug)]
pub struct ProgressAggregator {
    started: Instant,
}

impl ProgressAggregator {
    /// Start measuring from now
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Compute the current reading for `task`
    pub fn update(&self, task: &TransferTask) -> Progress {
        let bytes_transferred: u64 = task.chunks.iter().map(|c| c.bytes_so_far).sum();
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        let speed_bps = if elapsed_secs > 0.0 {
            (bytes_transferred as f64 / elapsed_secs) as u64
        } else {
            0
        };

        Progress {
            percent: percent_complete(task),
            bytes_transferred,
            speed_bps,
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}
