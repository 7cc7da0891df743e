//! Outbound queue entries.

use crate::record::{Payload, RecordKey};
use serde::{Deserialize, Serialize};

/// An entry in the pending-sync queue.
///
/// Entries are created whenever a record becomes `Pending` and are
/// consumed by the sync manager's push phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Insertion-order sequence number, unique across both queues.
    pub seq: u64,
    /// Record this entry pushes.
    pub key: RecordKey,
    /// Payload to push.
    pub payload: Payload,
    /// When the entry was first enqueued (ms).
    pub enqueued_at: i64,
    /// Number of failed push attempts so far.
    pub retry_count: u32,
    /// Earliest time (ms) the next attempt may run, when backoff is enabled.
    #[serde(default)]
    pub not_before: Option<i64>,
}

impl SyncQueueEntry {
    /// Creates a fresh entry with no recorded attempts.
    pub fn new(seq: u64, key: RecordKey, payload: Payload, enqueued_at: i64) -> Self {
        Self {
            seq,
            key,
            payload,
            enqueued_at,
            retry_count: 0,
            not_before: None,
        }
    }

    /// Returns true if the entry may be attempted at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }

    /// Returns true if one more failure exhausts the retry budget.
    pub fn is_last_attempt(&self, max_retries: u32) -> bool {
        self.retry_count + 1 >= max_retries
    }

    /// Converts this entry into a failed-queue entry.
    pub fn into_failed(self, failed_at: i64, reason: impl Into<String>) -> FailedQueueEntry {
        FailedQueueEntry {
            seq: self.seq,
            key: self.key,
            payload: self.payload,
            enqueued_at: self.enqueued_at,
            retry_count: self.retry_count,
            failed_at,
            reason: reason.into(),
        }
    }
}

/// An entry that exhausted its retries.
///
/// Failed entries are terminal until an operator resubmits them; they are
/// never retried automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedQueueEntry {
    /// Sequence number inherited from the pending entry.
    pub seq: u64,
    /// Record this entry pushes.
    pub key: RecordKey,
    /// Payload that could not be pushed.
    pub payload: Payload,
    /// When the original entry was enqueued (ms).
    pub enqueued_at: i64,
    /// Attempts recorded before failing.
    pub retry_count: u32,
    /// When the entry moved to the failed queue (ms).
    pub failed_at: i64,
    /// Last error reported by the remote.
    pub reason: String,
}

impl FailedQueueEntry {
    /// Re-creates a pending entry with a reset retry count.
    pub fn resubmit(self, seq: u64, now: i64) -> SyncQueueEntry {
        SyncQueueEntry::new(seq, self.key, self.payload, now)
    }
}
