//! Conflict records awaiting a manual decision.

use crate::record::{Payload, RecordKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Waiting for a decision.
    Pending,
    /// A decision was committed.
    Resolved,
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStatus::Pending => f.write_str("pending"),
            ConflictStatus::Resolved => f.write_str("resolved"),
        }
    }
}

/// A local-versus-remote divergence that the policy could not settle.
///
/// Created by the sync manager; only the manual resolution surface may move
/// it to `Resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Unique conflict id.
    pub conflict_id: String,
    /// The record in conflict.
    pub key: RecordKey,
    /// Local payload at the time the conflict was detected.
    pub local_data: Payload,
    /// Remote payload that could not be reconciled.
    pub server_data: Payload,
    /// Remote timestamp of `server_data` (ms).
    pub server_timestamp: i64,
    /// When the conflict was first recorded (ms). Refreshes keep it.
    pub timestamp: i64,
    /// Current status.
    pub status: ConflictStatus,
    /// Payload chosen by the resolver.
    #[serde(default)]
    pub resolved_data: Option<Payload>,
    /// When the resolution was committed (ms).
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

impl ConflictRecord {
    /// Creates a new pending conflict.
    pub fn new(
        conflict_id: impl Into<String>,
        key: RecordKey,
        local_data: Payload,
        server_data: Payload,
        server_timestamp: i64,
        timestamp: i64,
    ) -> Self {
        Self {
            conflict_id: conflict_id.into(),
            key,
            local_data,
            server_data,
            server_timestamp,
            timestamp,
            status: ConflictStatus::Pending,
            resolved_data: None,
            resolved_at: None,
        }
    }

    /// Returns true while the conflict awaits a decision.
    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }

    /// Marks the conflict resolved with the chosen payload.
    pub fn resolve(&mut self, resolved_data: Payload, resolved_at: i64) {
        self.status = ConflictStatus::Resolved;
        self.resolved_data = Some(resolved_data);
        self.resolved_at = Some(resolved_at);
    }
}
