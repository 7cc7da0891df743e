//! Journaled store operations and the in-memory tables they rebuild.
//!
//! Every logical write is staged as a batch of [`StoreOp`]s, appended to the
//! journal as one frame, and only then applied to [`Tables`]. Replay on open
//! applies the same batches in journal order, so the tables after recovery are
//! exactly the tables before the crash.

use crate::error::{StoreError, StoreResult};
use mendsync_protocol::{
    ConflictRecord, FailedQueueEntry, LocalRecord, RecordKey, SyncQueueEntry, SyncStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum StoreOp {
    /// Insert or overwrite a record.
    PutRecord(LocalRecord),
    /// Change the sync status of an existing record.
    SetStatus { key: RecordKey, status: SyncStatus },
    /// Insert or replace a pending queue entry by sequence number.
    Enqueue(SyncQueueEntry),
    /// Remove a pending queue entry.
    Dequeue { seq: u64 },
    /// Move a pending entry to the failed queue.
    Fail(FailedQueueEntry),
    /// Remove a failed queue entry.
    Unfail { seq: u64 },
    /// Insert or overwrite a conflict.
    PutConflict(ConflictRecord),
    /// Raise the last successful sync time.
    Watermark { last_sync_time: i64 },
    /// Restore the sequence counter (written by snapshots).
    Sequence { next_seq: u64 },
}

/// Encodes a batch of operations as a frame body.
pub(crate) fn encode_batch(ops: &[StoreOp]) -> StoreResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(ops, &mut body).map_err(StoreError::codec)?;
    Ok(body)
}

/// Decodes a frame body into a batch of operations.
pub(crate) fn decode_batch(body: &[u8]) -> StoreResult<Vec<StoreOp>> {
    ciborium::from_reader(body).map_err(StoreError::codec)
}

/// The materialized state of a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Tables {
    pub records: BTreeMap<RecordKey, LocalRecord>,
    pub pending: BTreeMap<u64, SyncQueueEntry>,
    pub failed: BTreeMap<u64, FailedQueueEntry>,
    pub conflicts: BTreeMap<String, ConflictRecord>,
    pub last_sync_time: Option<i64>,
    pub next_seq: u64,
}

impl Tables {
    /// Applies one operation.
    pub fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::PutRecord(record) => {
                self.records.insert(record.key.clone(), record);
            }
            StoreOp::SetStatus { key, status } => {
                if let Some(record) = self.records.get_mut(&key) {
                    record.sync_status = status;
                }
            }
            StoreOp::Enqueue(entry) => {
                self.bump_seq(entry.seq);
                self.pending.insert(entry.seq, entry);
            }
            StoreOp::Dequeue { seq } => {
                self.pending.remove(&seq);
            }
            StoreOp::Fail(entry) => {
                self.bump_seq(entry.seq);
                self.pending.remove(&entry.seq);
                self.failed.insert(entry.seq, entry);
            }
            StoreOp::Unfail { seq } => {
                self.failed.remove(&seq);
            }
            StoreOp::PutConflict(conflict) => {
                self.conflicts.insert(conflict.conflict_id.clone(), conflict);
            }
            StoreOp::Watermark { last_sync_time } => {
                self.last_sync_time = Some(
                    self.last_sync_time
                        .map_or(last_sync_time, |t| t.max(last_sync_time)),
                );
            }
            StoreOp::Sequence { next_seq } => {
                self.next_seq = self.next_seq.max(next_seq);
            }
        }
    }

    fn bump_seq(&mut self, seq: u64) {
        self.next_seq = self.next_seq.max(seq + 1);
    }

    /// Returns the pending entry for a key, if any.
    pub fn pending_for(&self, key: &RecordKey) -> Option<&SyncQueueEntry> {
        self.pending.values().find(|e| &e.key == key)
    }

    /// Returns the sequence numbers of failed entries for a key.
    pub fn failed_for(&self, key: &RecordKey) -> Vec<u64> {
        self.failed
            .values()
            .filter(|e| &e.key == key)
            .map(|e| e.seq)
            .collect()
    }

    /// Returns the open conflict for a key, if any.
    pub fn open_conflict_for(&self, key: &RecordKey) -> Option<&ConflictRecord> {
        self.conflicts
            .values()
            .find(|c| &c.key == key && c.is_pending())
    }

    /// Rebuilds the whole state as one batch.
    pub fn snapshot(&self) -> Vec<StoreOp> {
        let mut ops = Vec::with_capacity(
            self.records.len() + self.pending.len() + self.failed.len() + self.conflicts.len() + 2,
        );
        ops.extend(self.records.values().cloned().map(StoreOp::PutRecord));
        ops.extend(self.pending.values().cloned().map(StoreOp::Enqueue));
        ops.extend(self.failed.values().cloned().map(StoreOp::Fail));
        ops.extend(self.conflicts.values().cloned().map(StoreOp::PutConflict));
        if let Some(last_sync_time) = self.last_sync_time {
            ops.push(StoreOp::Watermark { last_sync_time });
        }
        ops.push(StoreOp::Sequence {
            next_seq: self.next_seq,
        });
        ops
    }
}
