//! Local records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a record by its type tag and id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record type tag (e.g. `"note"`, `"medical_records"`).
    pub record_type: String,
    /// Record id, unique within its type.
    pub id: String,
}

impl RecordKey {
    /// Creates a new record key.
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.id)
    }
}

/// The body of a record.
///
/// Payloads are opaque to the engine except for two things: a deletion is
/// carried as an explicit `Tombstone`, and the shallow merger looks at the
/// top-level fields of object payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// A live record body.
    Data(serde_json::Value),
    /// The record was deleted.
    Tombstone,
}

impl Payload {
    /// Creates a data payload.
    pub fn data(value: serde_json::Value) -> Self {
        Payload::Data(value)
    }

    /// Returns true if this payload marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Payload::Tombstone)
    }

    /// Returns the JSON body, if any.
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Data(value) => Some(value),
            Payload::Tombstone => None,
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Data(value)
    }
}

/// Synchronization state of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes not yet confirmed by the remote service.
    Pending,
    /// Local and remote agree.
    Synced,
    /// Pushing failed too many times; waiting for an operator.
    Failed,
}

impl SyncStatus {
    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// A record as held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Record key.
    pub key: RecordKey,
    /// Current body.
    pub payload: Payload,
    /// Milliseconds since the epoch of the last write.
    pub local_timestamp: i64,
    /// Synchronization state.
    pub sync_status: SyncStatus,
    /// Write counter, starting at 1.
    pub version: u64,
}
