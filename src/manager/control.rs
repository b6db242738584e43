//! Task control and queries: cancel, snapshots, speed limit.

use super::TransferManager;
use crate::error::{Error, Result};
use crate::task::{TaskHandle, TransferTask};
use crate::types::TaskId;

impl TransferManager {
    /// Cancel a transfer
    ///
    /// No further chunks are dispatched, in-flight calls are dropped and the
    /// task ends `Cancelled`. Cancelling a task that already finished is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task is unknown or was already evicted.
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let handle = self.handle(id).await.ok_or(Error::NotFound(id))?;

        if handle.status().is_terminal() {
            tracing::debug!(task_id = id.0, status = ?handle.status(), "cancel ignored for finished task");
            return Ok(());
        }

        tracing::info!(task_id = id.0, "cancelling transfer");
        handle.cancel();
        Ok(())
    }

    /// Observable handle of a tracked task
    pub async fn handle(&self, id: TaskId) -> Option<TaskHandle> {
        self.registry.active.lock().await.get(&id).cloned()
    }

    /// Snapshot of a tracked task
    pub async fn task(&self, id: TaskId) -> Option<TransferTask> {
        self.handle(id).await.map(|h| h.snapshot())
    }

    /// Snapshots of every tracked task, ordered by ID
    pub async fn tasks(&self) -> Vec<TransferTask> {
        let active = self.registry.active.lock().await;
        let mut tasks: Vec<TransferTask> = active.values().map(TaskHandle::snapshot).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Set the global bandwidth limit shared by all transfers
    ///
    /// `None` removes the limit. Applies to chunks dispatched from now on.
    pub fn set_speed_limit(&self, limit_bps: Option<u64>) {
        self.ctx.speed_limiter().set_limit(limit_bps);
        tracing::info!(limit_bps = ?limit_bps, "speed limit updated");
    }

    /// Current global bandwidth limit
    pub fn get_speed_limit(&self) -> Option<u64> {
        self.ctx.speed_limiter().get_limit()
    }
}
