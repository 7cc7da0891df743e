//! Remote change events and status reporting.

use crate::record::{Payload, RecordKey};
use serde::{Deserialize, Serialize};

/// A mutation reported by the remote change feed.
///
/// Change events are ephemeral: they are applied during a pull phase and
/// never persisted as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerChangeEvent {
    /// Record that changed.
    pub key: RecordKey,
    /// New remote payload.
    pub data: Payload,
    /// Remote commit time (ms).
    pub remote_timestamp: i64,
}

impl ServerChangeEvent {
    /// Creates a change event.
    pub fn new(key: RecordKey, data: Payload, remote_timestamp: i64) -> Self {
        Self {
            key,
            data,
            remote_timestamp,
        }
    }
}

/// Read-only summary for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Start time of the last fully completed cycle, if any.
    pub last_sync_time: Option<i64>,
    /// Entries in the pending-sync queue.
    pub pending_count: usize,
    /// Entries in the failed queue.
    pub failed_count: usize,
    /// Conflicts awaiting a decision.
    pub conflict_count: usize,
}

impl StatusSummary {
    /// Returns true if nothing is waiting on the network or on a person.
    pub fn is_clean(&self) -> bool {
        self.pending_count == 0 && self.failed_count == 0 && self.conflict_count == 0
    }
}
