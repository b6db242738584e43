//! Transfer task state and the observable handle around it.
//!
//! A [`TransferTask`] is owned by the orchestrator that created it. Every
//! mutation goes through [`TaskHandle::update`], which serializes writers on the
//! task's watch channel and notifies subscribers in the same step. Consumers only
//! ever see snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, TaskError};
use crate::planner::ChunkDescriptor;
use crate::progress;
use crate::types::{ChunkStatus, TaskId, TaskStatus, TransferKind};

/// Per-chunk transfer state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkState {
    /// Byte range covered by the chunk
    pub descriptor: ChunkDescriptor,
    /// Current chunk status
    pub status: ChunkStatus,
    /// Number of retries so far (0 while on the first try)
    pub attempts: u32,
    /// Bytes of this chunk transferred in the current attempt
    pub bytes_so_far: u64,
}

impl ChunkState {
    /// Fresh pending state for a planned chunk
    pub fn new(descriptor: ChunkDescriptor) -> Self {
        Self {
            descriptor,
            status: ChunkStatus::Pending,
            attempts: 0,
            bytes_so_far: 0,
        }
    }
}

/// One upload or download operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferTask {
    /// Task ID
    pub id: TaskId,
    /// Upload or download
    pub kind: TransferKind,
    /// Bucket name
    pub bucket_name: String,
    /// Object name
    pub object_name: String,
    /// Total payload size in bytes
    pub total_size_bytes: u64,
    /// Chunk states ordered by index
    pub chunks: Vec<ChunkState>,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Sum of `bytes_so_far` over all chunks
    pub bytes_transferred: u64,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Last error, set when the task failed or was cancelled
    pub error: Option<TaskError>,
}

impl TransferTask {
    /// Create a pending task with no planned chunks
    pub fn new(
        id: TaskId,
        kind: TransferKind,
        bucket_name: impl Into<String>,
        object_name: impl Into<String>,
        total_size_bytes: u64,
    ) -> Self {
        Self {
            id,
            kind,
            bucket_name: bucket_name.into(),
            object_name: object_name.into(),
            total_size_bytes,
            chunks: Vec::new(),
            status: TaskStatus::Pending,
            bytes_transferred: 0,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Progress percentage in `[0, 100]`
    pub fn progress(&self) -> f32 {
        progress::percent_complete(self)
    }

    /// Number of chunks in `Done` state
    pub fn completed_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Done)
            .count()
    }

    /// Whether every planned chunk is `Done`
    pub fn all_chunks_done(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.status == ChunkStatus::Done)
    }

    /// Install the planned chunks. Only allowed before any chunk was dispatched.
    pub(crate) fn set_chunks(&mut self, descriptors: &[ChunkDescriptor]) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.chunks = descriptors.iter().copied().map(ChunkState::new).collect();
        self.bytes_transferred = 0;
        true
    }

    /// Swap the chunk plan of a running download for the whole-object fetch
    ///
    /// Only allowed while no chunk has completed; progress restarts from zero.
    pub(crate) fn replan_whole(&mut self) -> bool {
        if self.status != TaskStatus::InProgress || self.completed_chunks() > 0 {
            return false;
        }
        self.chunks = vec![ChunkState::new(ChunkDescriptor::whole(self.total_size_bytes))];
        self.bytes_transferred = 0;
        true
    }

    /// Pending -> InProgress
    pub(crate) fn start(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::InProgress;
        true
    }

    fn live_chunk_mut(&mut self, index: u32) -> Option<&mut ChunkState> {
        if self.status.is_terminal() {
            return None;
        }
        let slot = (index as usize).checked_sub(1)?;
        self.chunks.get_mut(slot)
    }

    /// Mark a chunk as having a transport call in flight
    pub(crate) fn mark_in_flight(&mut self, index: u32) -> bool {
        match self.live_chunk_mut(index) {
            Some(chunk) if chunk.status != ChunkStatus::Done => {
                chunk.status = ChunkStatus::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Record the bytes of a chunk transferred so far in the current attempt
    pub(crate) fn record_progress(&mut self, index: u32, bytes: u64) -> bool {
        let Some(chunk) = self.live_chunk_mut(index) else {
            return false;
        };
        if chunk.status != ChunkStatus::InFlight {
            return false;
        }
        let clamped = bytes.min(chunk.descriptor.size_bytes);
        if clamped == chunk.bytes_so_far {
            return false;
        }
        let previous = std::mem::replace(&mut chunk.bytes_so_far, clamped);
        self.bytes_transferred = self.bytes_transferred - previous + clamped;
        true
    }

    /// Mark a chunk as transferred in full
    pub(crate) fn mark_done(&mut self, index: u32) -> bool {
        let Some(chunk) = self.live_chunk_mut(index) else {
            return false;
        };
        let size = chunk.descriptor.size_bytes;
        let previous = std::mem::replace(&mut chunk.bytes_so_far, size);
        chunk.status = ChunkStatus::Done;
        self.bytes_transferred = self.bytes_transferred - previous + size;
        true
    }

    /// Prepare a chunk for another attempt: bump `attempts`, reset its bytes
    pub(crate) fn mark_retry(&mut self, index: u32) -> bool {
        let Some(chunk) = self.live_chunk_mut(index) else {
            return false;
        };
        let previous = std::mem::replace(&mut chunk.bytes_so_far, 0);
        chunk.attempts += 1;
        chunk.status = ChunkStatus::InFlight;
        self.bytes_transferred -= previous;
        true
    }

    /// Mark a chunk as failed after its retry budget
    pub(crate) fn mark_chunk_failed(&mut self, index: u32) -> bool {
        match self.live_chunk_mut(index) {
            Some(chunk) => {
                chunk.status = ChunkStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Move the task to a terminal status. Terminal statuses are never left.
    pub(crate) fn finish(&mut self, status: TaskStatus, error: Option<&Error>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.error = error.map(TaskError::from);
        true
    }
}

/// Shared, observable handle to a running task
///
/// Cloning the handle is cheap; all clones observe the same task.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    state: Arc<watch::Sender<TransferTask>>,
    cancel_token: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(task: TransferTask, cancel_token: CancellationToken) -> Self {
        let id = task.id;
        let (state, _rx) = watch::channel(task);
        Self {
            id,
            state: Arc::new(state),
            cancel_token,
        }
    }

    /// Task ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Clone of the current task state
    pub fn snapshot(&self) -> TransferTask {
        self.state.borrow().clone()
    }

    /// Current lifecycle status
    pub fn status(&self) -> TaskStatus {
        self.state.borrow().status
    }

    /// Current progress percentage in `[0, 100]`
    pub fn progress(&self) -> f32 {
        self.state.borrow().progress()
    }

    /// Bytes uploaded or downloaded so far
    pub fn bytes_transferred(&self) -> u64 {
        self.state.borrow().bytes_transferred
    }

    /// Subscribe to change notifications; the receiver always holds the latest state
    pub fn subscribe(&self) -> watch::Receiver<TransferTask> {
        self.state.subscribe()
    }

    /// Request cancellation. Already-finished tasks are unaffected.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait until the task reaches a terminal status and return that final state
    pub async fn wait(&self) -> TransferTask {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|task| task.status.is_terminal()).await {
            Ok(task) => task.clone(),
            // The sender lives inside `self`, so the channel cannot close here
            Err(_) => self.snapshot(),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Apply a mutation; subscribers are notified only when `f` reports a change
    pub(crate) fn update(&self, f: impl FnOnce(&mut TransferTask) -> bool) -> bool {
        self.state.send_if_modified(f)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;

    fn planned_task(total: i64, chunk: i64) -> TransferTask {
        let mut task = TransferTask::new(
            TaskId(1),
            TransferKind::Upload,
            "bucket",
            "dir/file.bin",
            total as u64,
        );
        assert!(task.set_chunks(&plan(total, chunk).unwrap()));
        task
    }

    #[test]
    fn bytes_transferred_tracks_chunk_progress() {
        let mut task = planned_task(100, 40);
        task.start();

        assert!(task.mark_in_flight(1));
        assert!(task.record_progress(1, 25));
        assert_eq!(task.bytes_transferred, 25);

        assert!(task.mark_done(1));
        assert_eq!(task.bytes_transferred, 40);

        assert!(task.mark_in_flight(3));
        assert!(task.mark_done(3));
        assert_eq!(task.bytes_transferred, 60);
        assert_eq!(task.completed_chunks(), 2);
    }

    #[test]
    fn progress_is_clamped_to_chunk_size() {
        let mut task = planned_task(100, 40);
        task.start();
        task.mark_in_flight(2);

        task.record_progress(2, 1_000);

        assert_eq!(task.chunks[1].bytes_so_far, 40);
        assert_eq!(task.bytes_transferred, 40);
    }

    #[test]
    fn retry_increments_attempts_and_resets_bytes() {
        let mut task = planned_task(100, 50);
        task.start();
        task.mark_in_flight(1);
        task.record_progress(1, 30);
        assert_eq!(task.chunks[0].attempts, 0, "first try is not a retry");

        assert!(task.mark_retry(1));

        assert_eq!(task.chunks[0].attempts, 1);
        assert_eq!(task.chunks[0].bytes_so_far, 0);
        assert_eq!(task.bytes_transferred, 0);
        assert_eq!(task.chunks[0].status, ChunkStatus::InFlight);
    }

    #[test]
    fn terminal_status_is_final() {
        let mut task = planned_task(10, 10);
        task.start();

        assert!(task.finish(TaskStatus::Cancelled, Some(&Error::Cancelled)));
        assert!(!task.finish(TaskStatus::Completed, None));
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.finished_at.is_some());
        assert_eq!(
            task.error.as_ref().map(|e| e.kind),
            Some(crate::error::TransferErrorKind::Cancelled)
        );
    }

    #[test]
    fn chunk_updates_after_terminal_status_are_discarded() {
        let mut task = planned_task(100, 50);
        task.start();
        task.mark_in_flight(1);
        task.finish(TaskStatus::Cancelled, Some(&Error::Cancelled));

        assert!(!task.mark_done(1));
        assert!(!task.record_progress(1, 10));
        assert_eq!(task.chunks[0].status, ChunkStatus::InFlight);
        assert_eq!(task.bytes_transferred, 0);
    }

    #[test]
    fn non_terminal_finish_is_rejected() {
        let mut task = planned_task(10, 10);
        assert!(!task.finish(TaskStatus::InProgress, None));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn unknown_chunk_index_is_ignored() {
        let mut task = planned_task(10, 5);
        task.start();
        assert!(!task.mark_in_flight(0));
        assert!(!task.mark_in_flight(3));
    }

    #[tokio::test]
    async fn handle_notifies_subscribers_on_change() {
        let handle = TaskHandle::new(planned_task(10, 5), CancellationToken::new());
        let mut rx = handle.subscribe();
        rx.borrow_and_update();

        handle.update(|t| t.start());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn unchanged_update_does_not_notify() {
        let handle = TaskHandle::new(planned_task(10, 5), CancellationToken::new());
        let mut rx = handle.subscribe();
        rx.borrow_and_update();

        // Not InFlight, so progress is rejected
        assert!(!handle.update(|t| t.record_progress(1, 3)));

        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn wait_returns_terminal_state() {
        let handle = TaskHandle::new(planned_task(10, 5), CancellationToken::new());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };

        handle.update(|t| t.start());
        handle.update(|t| t.finish(TaskStatus::Failed, Some(&Error::Completion("x".into()))));

        let final_state = waiter.await.unwrap();
        assert_eq!(final_state.status, TaskStatus::Failed);
    }

    #[test]
    fn cancel_sets_token() {
        let handle = TaskHandle::new(planned_task(10, 5), CancellationToken::new());
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.cancel_token().is_cancelled());
    }

    #[test]
    fn replan_whole_restarts_from_a_single_chunk() {
        let mut task = planned_task(100, 40);
        assert!(!task.replan_whole(), "only running tasks are replanned");

        task.start();
        task.mark_in_flight(2);
        task.record_progress(2, 30);
        assert!(task.replan_whole());

        assert_eq!(task.chunks.len(), 1);
        assert_eq!(task.chunks[0].descriptor, ChunkDescriptor::whole(100));
        assert_eq!(task.bytes_transferred, 0);
    }

    #[test]
    fn replan_whole_refused_after_a_chunk_completed() {
        let mut task = planned_task(100, 40);
        task.start();
        task.mark_in_flight(1);
        task.mark_done(1);

        assert!(!task.replan_whole());
        assert_eq!(task.chunks.len(), 3);
    }
}
