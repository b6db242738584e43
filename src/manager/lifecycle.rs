//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::TransferManager;
use crate::task::TaskHandle;

/// How long shutdown waits for cancelled tasks to settle
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl TransferManager {
    /// Shut the manager down
    ///
    /// 1. Stops accepting new transfers
    /// 2. Cancels every running transfer
    /// 3. Waits (up to 30 seconds) for their tasks to reach a terminal status
    ///
    /// Tasks stay queryable until their eviction grace period ends.
    pub async fn shutdown(&self) {
        tracing::info!("initiating shutdown");

        self.registry.accepting_new.store(false, Ordering::SeqCst);
        self.ctx.cancel_all();

        let handles: Vec<TaskHandle> = self.registry.active.lock().await.values().cloned().collect();
        tracing::debug!(active_count = handles.len(), "waiting for transfers to stop");

        let settle = futures::future::join_all(handles.iter().map(TaskHandle::wait));
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, settle).await {
            Ok(_) => tracing::info!("shutdown complete"),
            Err(_) => tracing::warn!("timeout waiting for transfers to stop, proceeding with shutdown"),
        }
    }

    /// Whether new transfers are accepted
    pub fn is_accepting(&self) -> bool {
        self.registry.accepting_new.load(Ordering::SeqCst)
    }
}
