//! The local store interface the sync engine runs against.

use crate::error::StoreResult;
use mendsync_protocol::{
    ConflictRecord, FailedQueueEntry, LocalRecord, Payload, RecordKey, ServerChangeEvent,
    StatusSummary, SyncQueueEntry, SyncStatus,
};

/// Durable storage for records, the sync queues and conflicts.
///
/// Every mutating operation is atomic: a concurrent reader sees either the
/// state before it or the state after it, never a partial write. Storage
/// failures are returned to the caller, never swallowed.
///
/// # Queue invariants
///
/// - A key has at most one pending entry; later edits coalesce into it.
/// - A key is never in the pending and failed queue at the same time.
/// - A record whose status is not `Synced` has a pending or failed entry.
pub trait LocalStore: Send + Sync {
    /// Writes a local edit: status `Pending`, version + 1, queued for push.
    fn put(&self, record_type: &str, id: &str, payload: Payload) -> StoreResult<LocalRecord>;

    /// Deletes a record by writing a tombstone.
    fn delete(&self, record_type: &str, id: &str) -> StoreResult<LocalRecord> {
        self.put(record_type, id, Payload::Tombstone)
    }

    /// Reads a record.
    fn get(&self, record_type: &str, id: &str) -> StoreResult<Option<LocalRecord>>;

    /// Lists every record in key order.
    fn records(&self) -> StoreResult<Vec<LocalRecord>>;

    /// Lists pending queue entries in enqueue order.
    fn list_pending_sync(&self) -> StoreResult<Vec<SyncQueueEntry>>;

    /// Lists failed entries ordered by failure time.
    fn list_failed(&self) -> StoreResult<Vec<FailedQueueEntry>>;

    /// Lists unresolved conflicts ordered by creation time.
    fn list_pending_conflicts(&self) -> StoreResult<Vec<ConflictRecord>>;

    /// Lists every conflict, resolved ones included.
    fn list_conflicts(&self) -> StoreResult<Vec<ConflictRecord>>;

    /// Reads a conflict by id.
    fn get_conflict(&self, conflict_id: &str) -> StoreResult<Option<ConflictRecord>>;

    /// Returns the unresolved conflict for a key, if any.
    fn open_conflict_for(&self, key: &RecordKey) -> StoreResult<Option<ConflictRecord>>;

    /// Sets the sync status of an existing record.
    fn mark_sync_status(&self, key: &RecordKey, status: SyncStatus) -> StoreResult<()>;

    /// Records a conflict.
    ///
    /// If the key already has an unresolved conflict, that conflict's server
    /// side is refreshed instead and returned.
    fn enqueue_conflict(&self, conflict: ConflictRecord) -> StoreResult<ConflictRecord>;

    /// Resolves a conflict and writes the chosen payload as a new local edit.
    ///
    /// Fails with `ConflictNotFound` or `ConflictAlreadyResolved`.
    fn resolve_conflict(&self, conflict_id: &str, resolved: Payload) -> StoreResult<LocalRecord>;

    /// Confirms a successful push of `pushed` for entry `seq`.
    ///
    /// The entry is dequeued and the record marked `Synced` only if the entry
    /// still holds `pushed`. Returns false if a newer edit was coalesced in
    /// meanwhile; that edit stays queued.
    fn acknowledge_push(&self, seq: u64, pushed: &Payload) -> StoreResult<bool>;

    /// Bumps the retry count of a pending entry and returns the new count.
    fn retry_pending(&self, seq: u64, not_before: Option<i64>) -> StoreResult<u32>;

    /// Moves a pending entry to the failed queue and marks its record `Failed`.
    fn fail_pending(&self, seq: u64, reason: &str) -> StoreResult<FailedQueueEntry>;

    /// Writes a remote change as `Synced`, dropping any pending entry for the key.
    ///
    /// `seen` is the record the caller decided on, `None` if it was absent.
    /// If the record's version or status moved since, nothing is written and
    /// `Ok(None)` is returned so the caller can decide again.
    fn apply_remote(
        &self,
        event: &ServerChangeEvent,
        seen: Option<&LocalRecord>,
    ) -> StoreResult<Option<LocalRecord>>;

    /// Writes a merged payload over `seen` as a `Pending` local edit stamped
    /// `timestamp`.
    ///
    /// Returns `Ok(None)` without writing if the record moved past `seen`.
    fn write_merged(
        &self,
        seen: &LocalRecord,
        payload: Payload,
        timestamp: i64,
    ) -> StoreResult<Option<LocalRecord>>;

    /// Moves a failed entry back into the pending queue with a fresh retry budget.
    fn resubmit_failed(&self, seq: u64) -> StoreResult<SyncQueueEntry>;

    /// Returns the start time of the last cycle whose pull fully applied.
    fn last_sync_time(&self) -> StoreResult<Option<i64>>;

    /// Raises the last sync time. Never moves it backwards.
    fn advance_last_sync_time(&self, time: i64) -> StoreResult<()>;

    /// Returns queue and conflict counts.
    fn summary(&self) -> StoreResult<StatusSummary>;
}
