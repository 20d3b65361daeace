//! Persisted queue of mission writes made while the server was unreachable.
//!
//! Entries are replayed concurrently when connectivity returns. What happens
//! to entries whose replay fails is decided by [`DrainPolicy`]. A drain first
//! claims its rows in the database, so two drainers sharing one file never
//! replay the same entry.

use crate::database::{LocalDb, PendingRow};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use mlog_proto::PendingOperation;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A claim older than this belongs to a drainer that died mid-drain.
const CLAIM_TTL: Duration = Duration::from_secs(300);

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainPolicy {
    /// Every dispatched entry leaves the queue, failed or not.
    #[default]
    BestEffort,
    /// Entries that failed on the network or with a 5xx stay for the next reconnect.
    RetainFailed,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server answered {status}")]
    Rejected { status: u16 },
}

impl ReplayError {
    /// Worth retrying later: the request never reached the server or the server failed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReplayError::Transport(_) => true,
            ReplayError::Rejected { status } => *status >= 500,
        }
    }
}

/// Sends one queued operation to the server.
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(&self, op: &PendingOperation) -> Result<(), ReplayError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed entries kept in the queue
    pub retained: usize,
    /// Undecodable entries moved out of the queue
    pub dead_lettered: usize,
}

pub struct PendingQueue {
    db: Arc<LocalDb>,
    policy: DrainPolicy,
    owner: String,
}

impl PendingQueue {
    pub fn new(db: Arc<LocalDb>, policy: DrainPolicy) -> Self {
        let owner = format!(
            "{}-{}",
            std::process::id(),
            NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)
        );
        Self { db, policy, owner }
    }

    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    pub fn enqueue(&self, op: PendingOperation) -> Result<i64> {
        let seq = self.db.insert_pending(&op)?;
        tracing::info!(seq, operation = %op, "queued write for later sync");
        Ok(seq)
    }

    /// Queued entries in FIFO order.
    pub fn snapshot(&self) -> Result<Vec<PendingRow>> {
        self.db.pending()
    }

    pub fn len(&self) -> Result<usize> {
        self.db.pending_count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Replay everything currently queued and prune according to the policy.
    ///
    /// Replay failures are logged, never returned. Only the entries claimed at
    /// the start are touched, so writes queued while the drain runs are kept
    /// and rows claimed by another drainer are skipped.
    pub async fn drain_and_replay(&self, replayer: &dyn Replayer) -> Result<DrainReport> {
        let claim = self.db.claim_pending(&self.owner, CLAIM_TTL)?;
        if claim.dead_lettered > 0 {
            tracing::warn!(
                count = claim.dead_lettered,
                "undecodable queued writes moved to dead_ops"
            );
        }
        let entries = claim.rows;
        if entries.is_empty() {
            return Ok(DrainReport {
                dead_lettered: claim.dead_lettered,
                ..DrainReport::default()
            });
        }
        tracing::info!(count = entries.len(), "replaying queued writes");

        let results = join_all(entries.iter().map(|entry| replayer.replay(&entry.op))).await;

        let mut report = DrainReport {
            dispatched: entries.len(),
            dead_lettered: claim.dead_lettered,
            ..DrainReport::default()
        };
        let mut remove = Vec::with_capacity(entries.len());
        let mut keep = Vec::new();
        for (entry, result) in entries.iter().zip(results) {
            match result {
                Ok(()) => {
                    report.succeeded += 1;
                    remove.push(entry.seq);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(seq = entry.seq, operation = %entry.op, error = %e, "replay failed");
                    if self.policy == DrainPolicy::RetainFailed && e.is_transient() {
                        report.retained += 1;
                        keep.push(entry.seq);
                    } else {
                        remove.push(entry.seq);
                    }
                }
            }
        }
        self.db.remove_pending(&remove)?;
        self.db.release_pending(&keep)?;

        let lost = report.failed - report.retained;
        if lost > 0 {
            tracing::warn!(lost, "queued writes dropped after failed replay");
        }
        tracing::info!(
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            failed = report.failed,
            retained = report.retained,
            "drain finished"
        );
        Ok(report)
    }
}
