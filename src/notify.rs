// src/notify.rs - Queue size and position change notifications
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::job::{Job, JobEvent};

/// Position reported for the current job while the device is running.
pub const POSITION_PLOTTING: i64 = -1;

/// Dispatches queue-size and per-job position changes.
///
/// Position events go to each job's own event channel and are deduplicated
/// against the last value delivered, so observers see exactly one event per
/// actual change. Size changes fan out over a single broadcast channel to
/// every subscriber.
#[derive(Debug)]
pub struct NotificationBus {
    size_tx: broadcast::Sender<usize>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (size_tx, _) = broadcast::channel(64);
        Self { size_tx }
    }

    pub fn subscribe_size(&self) -> broadcast::Receiver<usize> {
        self.size_tx.subscribe()
    }

    /// Announce the total job count. No subscribers is fine.
    pub fn notify_size(&self, count: usize) {
        let _ = self.size_tx.send(count);
    }

    /// Recompute every job's position and notify those whose value changed.
    ///
    /// The current job reports `0`, or `POSITION_PLOTTING` while the device
    /// is running it; queued jobs report their index + 1. The stored
    /// last-notified value is updated before the event is sent.
    pub fn notify_positions(&self, current: Option<(Arc<Job>, bool)>, queued: &[Arc<Job>]) {
        if let Some((job, plotting)) = current {
            let position = if plotting { POSITION_PLOTTING } else { 0 };
            Self::notify_position(&job, position);
        }
        for (index, job) in queued.iter().enumerate() {
            Self::notify_position(job, index as i64 + 1);
        }
    }

    fn notify_position(job: &Arc<Job>, position: i64) {
        let changed = {
            let mut state = job.state();
            if state.position_notified == Some(position) {
                false
            } else {
                state.position_notified = Some(position);
                true
            }
        };
        if changed {
            job.send(JobEvent::QueuePosition {
                position,
                client: job.client.clone(),
            });
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
