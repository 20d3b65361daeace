//! Replays the pending queue when the client comes back online.

use crate::queue::{DrainReport, PendingQueue, Replayer};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl From<bool> for ConnectivityState {
    fn from(online: bool) -> Self {
        if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }
}

/// Drains the pending queue once on every Offline to Online transition.
pub struct SyncReconciler {
    queue: Arc<PendingQueue>,
    replayer: Arc<dyn Replayer>,
    previous: ConnectivityState,
}

impl SyncReconciler {
    pub fn new(queue: Arc<PendingQueue>, replayer: Arc<dyn Replayer>) -> Self {
        Self {
            queue,
            replayer,
            previous: ConnectivityState::Offline,
        }
    }

    /// Feed one observed state. Returns the drain report when this observation
    /// caused a drain.
    pub async fn observe(&mut self, current: ConnectivityState) -> Option<DrainReport> {
        let previous = std::mem::replace(&mut self.previous, current);
        if previous != ConnectivityState::Offline || current != ConnectivityState::Online {
            return None;
        }
        tracing::info!("back online, syncing queued writes");
        match self.queue.drain_and_replay(self.replayer.as_ref()).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = ?e, "failed to drain pending queue");
                None
            }
        }
    }

    /// Follow the connectivity channel until it closes.
    pub async fn run(mut self, mut online: watch::Receiver<bool>) {
        loop {
            let current = ConnectivityState::from(*online.borrow_and_update());
            self.observe(current).await;
            if online.changed().await.is_err() {
                break;
            }
        }
    }
}
