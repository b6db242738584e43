//! Background progress reporting for a running transfer.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressAggregator;
use crate::task::TaskHandle;
use crate::types::{Event, TaskStatus};

/// Interval between progress update emissions
const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn a background task that periodically emits [`Event::Progress`] while
/// the task is in progress. Stops when `stop` is cancelled.
pub(crate) fn spawn_progress_reporter(
    handle: TaskHandle,
    event_tx: broadcast::Sender<Event>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let aggregator = ProgressAggregator::new();
        let mut interval = tokio::time::interval(PROGRESS_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let task = handle.snapshot();
                    if task.status != TaskStatus::InProgress {
                        continue;
                    }
                    let reading = aggregator.update(&task);
                    event_tx
                        .send(Event::Progress {
                            id: task.id,
                            percent: reading.percent,
                            bytes_transferred: reading.bytes_transferred,
                            speed_bps: reading.speed_bps,
                        })
                        .ok();
                }
                _ = stop.cancelled() => {
                    break;
                }
            }
        }
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;
    use crate::task::TransferTask;
    use crate::types::{TaskId, TransferKind};

    fn running_handle() -> TaskHandle {
        let mut task = TransferTask::new(TaskId(9), TransferKind::Download, "b", "o", 1000);
        task.set_chunks(&plan(1000, 250).unwrap());
        task.start();
        TaskHandle::new(task, CancellationToken::new())
    }

    async fn collect_for(rx: &mut broadcast::Receiver<Event>, window: Duration) -> Vec<Event> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            tokio::select! {
                result = rx.recv() => {
                    if let Ok(event) = result {
                        events.push(event);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        events
    }

    #[tokio::test]
    async fn emits_progress_while_in_progress() {
        let handle = running_handle();
        handle.update(|t| t.mark_in_flight(1) && t.mark_done(1));
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let stop = CancellationToken::new();

        let _reporter = spawn_progress_reporter(handle, event_tx, stop.clone());
        let events = collect_for(&mut event_rx, Duration::from_millis(600)).await;
        stop.cancel();

        let percent = events.iter().find_map(|e| match e {
            Event::Progress { id, percent, .. } if *id == TaskId(9) => Some(*percent),
            _ => None,
        });
        assert_eq!(percent, Some(25.0));
    }

    #[tokio::test]
    async fn silent_once_task_is_terminal() {
        let handle = running_handle();
        handle.update(|t| t.finish(TaskStatus::Completed, None));
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let stop = CancellationToken::new();

        let _reporter = spawn_progress_reporter(handle, event_tx, stop.clone());
        let events = collect_for(&mut event_rx, Duration::from_millis(600)).await;
        stop.cancel();

        assert!(events.is_empty(), "got {events:?}");
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let (event_tx, _rx) = broadcast::channel(16);
        let stop = CancellationToken::new();

        let reporter = spawn_progress_reporter(running_handle(), event_tx, stop.clone());
        stop.cancel();

        tokio::time::timeout(Duration::from_secs(1), reporter)
            .await
            .expect("reporter should exit")
            .unwrap();
    }
}
