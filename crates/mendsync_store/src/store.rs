//! Journal-backed implementation of [`LocalStore`].

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::journal::{decode_frames, encode_frame, FileJournal, Journal, MemoryJournal};
use crate::local_store::LocalStore;
use crate::ops::{decode_batch, encode_batch, StoreOp, Tables};
use mendsync_protocol::{
    Clock, ConflictRecord, FailedQueueEntry, LocalRecord, Payload, RecordKey, ServerChangeEvent,
    StatusSummary, SyncQueueEntry, SyncStatus, SystemClock,
};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A local store persisted in a [`Journal`].
///
/// Reads are served from in-memory tables rebuilt on open. Writes take the
/// table lock, append one frame to the journal, and apply the frame to the
/// tables only after the append succeeded.
///
/// # Example
///
/// ```rust
/// use mendsync_store::{LocalStore, Store};
/// use serde_json::json;
///
/// let store = Store::in_memory().unwrap();
/// store.put("note", "p1", json!({"title": "hello"}).into()).unwrap();
///
/// let pending = store.list_pending_sync().unwrap();
/// assert_eq!(pending.len(), 1);
/// ```
pub struct Store<J: Journal> {
    tables: RwLock<Tables>,
    journal: Mutex<J>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    frames_since_compact: AtomicU64,
}

impl Store<MemoryJournal> {
    /// Creates an empty in-memory store using the system clock.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(
            MemoryJournal::new(),
            Arc::new(SystemClock),
            StoreConfig::default(),
        )
    }
}

impl Store<FileJournal> {
    /// Opens or creates a store in a directory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process has the store open.
    pub fn open_dir(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let journal = FileJournal::open(path.as_ref())?;
        Self::open(journal, clock, config)
    }
}

impl<J: Journal> Store<J> {
    /// Opens a store over a journal, replaying every complete frame.
    ///
    /// A torn tail left by a crash is cut off. Damage before the last frame
    /// is reported as corruption.
    pub fn open(mut journal: J, clock: Arc<dyn Clock>, config: StoreConfig) -> StoreResult<Self> {
        let data = journal.read_all()?;
        let decoded = decode_frames(&data)?;

        if decoded.has_torn_tail(data.len() as u64) {
            tracing::warn!(
                valid_len = decoded.valid_len,
                total_len = data.len(),
                "truncating torn journal tail"
            );
            journal.truncate(decoded.valid_len)?;
        }

        let mut tables = Tables::default();
        for body in &decoded.bodies {
            for op in decode_batch(body)? {
                tables.apply(op);
            }
        }

        tracing::debug!(
            frames = decoded.bodies.len(),
            records = tables.records.len(),
            pending = tables.pending.len(),
            failed = tables.failed.len(),
            "store opened"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
            clock,
            config,
            frames_since_compact: AtomicU64::new(decoded.bodies.len() as u64),
        })
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rewrites the journal as a single snapshot frame.
    pub fn compact(&self) -> StoreResult<()> {
        let tables = self.tables.write();
        self.compact_locked(&tables)
    }

    /// Returns the current journal size in bytes.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.journal.lock().size()
    }

    fn compact_locked(&self, tables: &Tables) -> StoreResult<()> {
        let frame = encode_frame(&encode_batch(&tables.snapshot())?)?;
        self.journal.lock().replace(&frame)?;
        self.frames_since_compact.store(1, Ordering::SeqCst);
        tracing::debug!(bytes = frame.len(), "journal compacted");
        Ok(())
    }

    /// Makes `ops` durable, then applies them.
    fn commit(&self, tables: &mut Tables, ops: Vec<StoreOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&encode_batch(&ops)?)?;

        {
            let mut journal = self.journal.lock();
            let before = journal.size()?;
            let written = journal.append(&frame).and_then(|()| {
                if self.config.sync_on_write {
                    journal.sync()
                } else {
                    Ok(())
                }
            });
            if let Err(err) = written {
                // Cut whatever part of the frame made it to the journal.
                if journal.size()? > before {
                    if let Err(rollback) = journal.truncate(before) {
                        tracing::error!(
                            error = %err,
                            rollback = %rollback,
                            "could not roll back failed journal write"
                        );
                        return Err(StoreError::Unavailable(format!(
                            "{err}; rollback to {before} bytes failed: {rollback}"
                        )));
                    }
                }
                return Err(err);
            }
        }

        for op in ops {
            tables.apply(op);
        }

        let frames = self.frames_since_compact.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.config.compact_after {
            if frames >= limit {
                if let Err(err) = self.compact_locked(tables) {
                    tracing::warn!(error = %err, "automatic compaction failed");
                }
            }
        }
        Ok(())
    }

    /// Stages a local edit: the record goes to `Pending` and the pending
    /// queue holds exactly one entry for the key carrying `payload`.
    fn stage_local_write(
        tables: &Tables,
        key: &RecordKey,
        payload: Payload,
        timestamp: i64,
        ops: &mut Vec<StoreOp>,
    ) -> LocalRecord {
        let version = tables.records.get(key).map_or(1, |r| r.version + 1);
        let record = LocalRecord {
            key: key.clone(),
            payload: payload.clone(),
            local_timestamp: timestamp,
            sync_status: SyncStatus::Pending,
            version,
        };
        ops.push(StoreOp::PutRecord(record.clone()));

        for seq in tables.failed_for(key) {
            ops.push(StoreOp::Unfail { seq });
        }

        let entry = match tables.pending_for(key) {
            Some(existing) => SyncQueueEntry {
                payload,
                ..existing.clone()
            },
            None => SyncQueueEntry::new(tables.next_seq, key.clone(), payload, timestamp),
        };
        ops.push(StoreOp::Enqueue(entry));

        record
    }

    /// True if the stored record still matches what a caller read earlier.
    fn unchanged_since(current: Option<&LocalRecord>, seen: Option<&LocalRecord>) -> bool {
        match (current, seen) {
            (None, None) => true,
            (Some(current), Some(seen)) => {
                current.version == seen.version && current.sync_status == seen.sync_status
            }
            _ => false,
        }
    }

    fn pending_entry(tables: &Tables, seq: u64) -> StoreResult<&SyncQueueEntry> {
        tables.pending.get(&seq).ok_or(StoreError::EntryNotFound(seq))
    }
}

impl<J: Journal> LocalStore for Store<J> {
    fn put(&self, record_type: &str, id: &str, payload: Payload) -> StoreResult<LocalRecord> {
        let key = RecordKey::new(record_type, id);
        let now = self.clock.now_millis();
        let mut tables = self.tables.write();

        let mut ops = Vec::new();
        let record = Self::stage_local_write(&tables, &key, payload, now, &mut ops);
        self.commit(&mut tables, ops)?;

        tracing::debug!(key = %key, version = record.version, "local write queued");
        Ok(record)
    }

    fn get(&self, record_type: &str, id: &str) -> StoreResult<Option<LocalRecord>> {
        let key = RecordKey::new(record_type, id);
        Ok(self.tables.read().records.get(&key).cloned())
    }

    fn records(&self) -> StoreResult<Vec<LocalRecord>> {
        Ok(self.tables.read().records.values().cloned().collect())
    }

    fn list_pending_sync(&self) -> StoreResult<Vec<SyncQueueEntry>> {
        Ok(self.tables.read().pending.values().cloned().collect())
    }

    fn list_failed(&self) -> StoreResult<Vec<FailedQueueEntry>> {
        let mut failed: Vec<_> = self.tables.read().failed.values().cloned().collect();
        failed.sort_by_key(|e| (e.failed_at, e.seq));
        Ok(failed)
    }

    fn list_pending_conflicts(&self) -> StoreResult<Vec<ConflictRecord>> {
        let mut conflicts: Vec<_> = self
            .tables
            .read()
            .conflicts
            .values()
            .filter(|c| c.is_pending())
            .cloned()
            .collect();
        conflicts.sort_by(|a, b| {
            (a.timestamp, &a.conflict_id).cmp(&(b.timestamp, &b.conflict_id))
        });
        Ok(conflicts)
    }

    fn list_conflicts(&self) -> StoreResult<Vec<ConflictRecord>> {
        let mut conflicts: Vec<_> = self.tables.read().conflicts.values().cloned().collect();
        conflicts.sort_by(|a, b| {
            (a.timestamp, &a.conflict_id).cmp(&(b.timestamp, &b.conflict_id))
        });
        Ok(conflicts)
    }

    fn get_conflict(&self, conflict_id: &str) -> StoreResult<Option<ConflictRecord>> {
        Ok(self.tables.read().conflicts.get(conflict_id).cloned())
    }

    fn open_conflict_for(&self, key: &RecordKey) -> StoreResult<Option<ConflictRecord>> {
        Ok(self.tables.read().open_conflict_for(key).cloned())
    }

    fn mark_sync_status(&self, key: &RecordKey, status: SyncStatus) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.records.contains_key(key) {
            return Err(StoreError::RecordNotFound(key.clone()));
        }
        self.commit(
            &mut tables,
            vec![StoreOp::SetStatus {
                key: key.clone(),
                status,
            }],
        )
    }

    fn enqueue_conflict(&self, conflict: ConflictRecord) -> StoreResult<ConflictRecord> {
        let mut tables = self.tables.write();

        let stored = match tables.open_conflict_for(&conflict.key) {
            Some(open) => {
                tracing::debug!(
                    key = %conflict.key,
                    conflict_id = %open.conflict_id,
                    "refreshing open conflict"
                );
                ConflictRecord {
                    server_data: conflict.server_data,
                    server_timestamp: conflict.server_timestamp,
                    ..open.clone()
                }
            }
            None => conflict,
        };

        self.commit(&mut tables, vec![StoreOp::PutConflict(stored.clone())])?;
        Ok(stored)
    }

    fn resolve_conflict(&self, conflict_id: &str, resolved: Payload) -> StoreResult<LocalRecord> {
        let now = self.clock.now_millis();
        let mut tables = self.tables.write();

        let mut conflict = tables
            .conflicts
            .get(conflict_id)
            .cloned()
            .ok_or_else(|| StoreError::ConflictNotFound(conflict_id.to_string()))?;
        if !conflict.is_pending() {
            return Err(StoreError::ConflictAlreadyResolved(conflict_id.to_string()));
        }
        conflict.resolve(resolved.clone(), now);

        let mut ops = Vec::new();
        let record = Self::stage_local_write(&tables, &conflict.key, resolved, now, &mut ops);
        ops.push(StoreOp::PutConflict(conflict));
        self.commit(&mut tables, ops)?;

        tracing::debug!(key = %record.key, conflict_id, "conflict resolved");
        Ok(record)
    }

    fn acknowledge_push(&self, seq: u64, pushed: &Payload) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        let entry = Self::pending_entry(&tables, seq)?;
        if &entry.payload != pushed {
            return Ok(false);
        }
        let key = entry.key.clone();

        let mut ops = vec![StoreOp::Dequeue { seq }];
        if tables.records.contains_key(&key) {
            ops.push(StoreOp::SetStatus {
                key,
                status: SyncStatus::Synced,
            });
        }
        self.commit(&mut tables, ops)?;
        Ok(true)
    }

    fn retry_pending(&self, seq: u64, not_before: Option<i64>) -> StoreResult<u32> {
        let mut tables = self.tables.write();
        let mut entry = Self::pending_entry(&tables, seq)?.clone();
        entry.retry_count += 1;
        entry.not_before = not_before;
        let retry_count = entry.retry_count;

        self.commit(&mut tables, vec![StoreOp::Enqueue(entry)])?;
        Ok(retry_count)
    }

    fn fail_pending(&self, seq: u64, reason: &str) -> StoreResult<FailedQueueEntry> {
        let now = self.clock.now_millis();
        let mut tables = self.tables.write();
        let failed = Self::pending_entry(&tables, seq)?
            .clone()
            .into_failed(now, reason);

        let mut ops = vec![StoreOp::Fail(failed.clone())];
        if tables.records.contains_key(&failed.key) {
            ops.push(StoreOp::SetStatus {
                key: failed.key.clone(),
                status: SyncStatus::Failed,
            });
        }
        self.commit(&mut tables, ops)?;
        Ok(failed)
    }

    fn apply_remote(
        &self,
        event: &ServerChangeEvent,
        seen: Option<&LocalRecord>,
    ) -> StoreResult<Option<LocalRecord>> {
        let mut tables = self.tables.write();
        let current = tables.records.get(&event.key);
        if !Self::unchanged_since(current, seen) {
            tracing::debug!(key = %event.key, "record moved before remote change was applied");
            return Ok(None);
        }
        let version = current.map_or(1, |r| r.version + 1);
        let record = LocalRecord {
            key: event.key.clone(),
            payload: event.data.clone(),
            local_timestamp: event.remote_timestamp,
            sync_status: SyncStatus::Synced,
            version,
        };

        let mut ops = vec![StoreOp::PutRecord(record.clone())];
        if let Some(stale) = tables.pending_for(&event.key) {
            ops.push(StoreOp::Dequeue { seq: stale.seq });
        }
        self.commit(&mut tables, ops)?;
        Ok(Some(record))
    }

    fn write_merged(
        &self,
        seen: &LocalRecord,
        payload: Payload,
        timestamp: i64,
    ) -> StoreResult<Option<LocalRecord>> {
        let mut tables = self.tables.write();
        if !Self::unchanged_since(tables.records.get(&seen.key), Some(seen)) {
            tracing::debug!(key = %seen.key, "record moved before merge was written");
            return Ok(None);
        }
        let mut ops = Vec::new();
        let record = Self::stage_local_write(&tables, &seen.key, payload, timestamp, &mut ops);
        self.commit(&mut tables, ops)?;
        Ok(Some(record))
    }

    fn resubmit_failed(&self, seq: u64) -> StoreResult<SyncQueueEntry> {
        let now = self.clock.now_millis();
        let mut tables = self.tables.write();
        let failed = tables
            .failed
            .get(&seq)
            .cloned()
            .ok_or(StoreError::EntryNotFound(seq))?;
        let key = failed.key.clone();
        let entry = failed.resubmit(tables.next_seq, now);

        let mut ops = vec![StoreOp::Unfail { seq }, StoreOp::Enqueue(entry.clone())];
        if tables.records.contains_key(&key) {
            ops.push(StoreOp::SetStatus {
                key,
                status: SyncStatus::Pending,
            });
        }
        self.commit(&mut tables, ops)?;

        tracing::debug!(
            old_seq = seq,
            seq = entry.seq,
            key = %entry.key,
            "failed entry resubmitted"
        );
        Ok(entry)
    }

    fn last_sync_time(&self) -> StoreResult<Option<i64>> {
        Ok(self.tables.read().last_sync_time)
    }

    fn advance_last_sync_time(&self, time: i64) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if tables.last_sync_time.map_or(false, |t| t >= time) {
            return Ok(());
        }
        self.commit(
            &mut tables,
            vec![StoreOp::Watermark {
                last_sync_time: time,
            }],
        )
    }

    fn summary(&self) -> StoreResult<StatusSummary> {
        let tables = self.tables.read();
        Ok(StatusSummary {
            last_sync_time: tables.last_sync_time,
            pending_count: tables.pending.len(),
            failed_count: tables.failed.len(),
            conflict_count: tables.conflicts.values().filter(|c| c.is_pending()).count(),
        })
    }
}

impl<J: Journal> std::fmt::Debug for Store<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("Store")
            .field("records", &tables.records.len())
            .field("pending", &tables.pending.len())
            .field("failed", &tables.failed.len())
            .field("conflicts", &tables.conflicts.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mendsync_protocol::ManualClock;
    use serde_json::json;

    fn store_at(clock: &Arc<ManualClock>, journal: MemoryJournal) -> Store<MemoryJournal> {
        Store::open(journal, clock.clone(), StoreConfig::default()).unwrap()
    }

    fn new_store() -> (Arc<ManualClock>, MemoryJournal, Store<MemoryJournal>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let journal = MemoryJournal::new();
        let store = store_at(&clock, journal.clone());
        (clock, journal, store)
    }

    fn data(v: serde_json::Value) -> Payload {
        Payload::data(v)
    }

    fn conflict(id: &str, key: RecordKey, server: Payload, at: i64) -> ConflictRecord {
        ConflictRecord::new(id, key, data(json!({"side": "local"})), server, at, at)
    }

    #[test]
    fn put_queues_and_versions() {
        let (_, _, store) = new_store();

        let first = store.put("note", "a", data(json!({"v": 1}))).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.sync_status, SyncStatus::Pending);
        assert_eq!(first.local_timestamp, 1_000);

        let second = store.put("note", "a", data(json!({"v": 2}))).unwrap();
        assert_eq!(second.version, 2);

        let pending = store.list_pending_sync().unwrap();
        assert_eq!(pending.len(), 1, "edits to one key coalesce");
        assert_eq!(pending[0].payload, data(json!({"v": 2})));
    }

    #[test]
    fn coalescing_keeps_position_and_retries() {
        let (_, _, store) = new_store();
        store.put("note", "a", data(json!(1))).unwrap();
        store.put("note", "b", data(json!(2))).unwrap();

        let seq_a = store.list_pending_sync().unwrap()[0].seq;
        store.retry_pending(seq_a, None).unwrap();
        store.put("note", "a", data(json!(3))).unwrap();

        let pending = store.list_pending_sync().unwrap();
        assert_eq!(pending[0].key, RecordKey::new("note", "a"));
        assert_eq!(pending[0].seq, seq_a);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(pending[0].payload, data(json!(3)));
    }

    #[test]
    fn delete_writes_tombstone() {
        let (_, _, store) = new_store();
        store.put("note", "a", data(json!({}))).unwrap();
        let deleted = store.delete("note", "a").unwrap();
        assert!(deleted.payload.is_tombstone());
        assert!(store.list_pending_sync().unwrap()[0].payload.is_tombstone());
    }

    #[test]
    fn acknowledge_only_matching_payload() {
        let (_, _, store) = new_store();
        store.put("note", "a", data(json!(1))).unwrap();
        let entry = store.list_pending_sync().unwrap().remove(0);

        store.put("note", "a", data(json!(2))).unwrap();
        assert!(!store.acknowledge_push(entry.seq, &entry.payload).unwrap());
        assert_eq!(store.list_pending_sync().unwrap().len(), 1);

        assert!(store.acknowledge_push(entry.seq, &data(json!(2))).unwrap());
        assert!(store.list_pending_sync().unwrap().is_empty());
        assert_eq!(
            store.get("note", "a").unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[test]
    fn fail_and_resubmit() {
        let (clock, _, store) = new_store();
        store.put("note", "a", data(json!(1))).unwrap();
        let seq = store.list_pending_sync().unwrap()[0].seq;

        clock.advance(50);
        let failed = store.fail_pending(seq, "rejected").unwrap();
        assert_eq!(failed.failed_at, 1_050);
        assert!(store.list_pending_sync().unwrap().is_empty());
        assert_eq!(
            store.get("note", "a").unwrap().unwrap().sync_status,
            SyncStatus::Failed
        );

        let entry = store.resubmit_failed(seq).unwrap();
        assert_ne!(entry.seq, seq);
        assert_eq!(entry.retry_count, 0);
        assert!(store.list_failed().unwrap().is_empty());
        assert_eq!(
            store.get("note", "a").unwrap().unwrap().sync_status,
            SyncStatus::Pending
        );

        assert!(matches!(
            store.resubmit_failed(seq),
            Err(StoreError::EntryNotFound(_))
        ));
    }

    #[test]
    fn put_supersedes_failed_entry() {
        let (_, _, store) = new_store();
        store.put("note", "a", data(json!(1))).unwrap();
        let seq = store.list_pending_sync().unwrap()[0].seq;
        store.fail_pending(seq, "rejected").unwrap();

        store.put("note", "a", data(json!(2))).unwrap();
        assert!(store.list_failed().unwrap().is_empty());
        assert_eq!(store.list_pending_sync().unwrap().len(), 1);
    }

    #[test]
    fn apply_remote_drops_stale_entry() {
        let (_, _, store) = new_store();
        store.put("note", "a", data(json!("local"))).unwrap();

        let seen = store.get("note", "a").unwrap();
        let key = RecordKey::new("note", "a");
        let event = ServerChangeEvent::new(key, data(json!("server")), 5_000);
        let record = store.apply_remote(&event, seen.as_ref()).unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.local_timestamp, 5_000);
        assert_eq!(record.version, 2);
        assert!(store.list_pending_sync().unwrap().is_empty());
    }

    #[test]
    fn remote_write_over_moved_record_is_refused() {
        let (_, _, store) = new_store();
        let seen = store.put("note", "a", data(json!("first"))).unwrap();
        store.put("note", "a", data(json!("second"))).unwrap();

        let key = RecordKey::new("note", "a");
        let event = ServerChangeEvent::new(key, data(json!("server")), 5_000);
        assert!(store.apply_remote(&event, Some(&seen)).unwrap().is_none());
        assert!(store.write_merged(&seen, data(json!("merged")), 6_000).unwrap().is_none());

        let fresh = ServerChangeEvent::new(RecordKey::new("note", "b"), data(json!("new")), 5_000);
        assert!(store.apply_remote(&fresh, Some(&seen)).unwrap().is_none());
        store.put("note", "b", data(json!("raced"))).unwrap();
        assert!(store.apply_remote(&fresh, None).unwrap().is_none());

        let record = store.get("note", "a").unwrap().unwrap();
        assert_eq!(record.payload, data(json!("second")));
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(store.list_pending_sync().unwrap().len(), 2);
    }

    #[test]
    fn conflict_refresh_and_resolve() {
        let (clock, _, store) = new_store();
        let key = RecordKey::new("note", "a");
        store.put("note", "a", data(json!({"side": "local"}))).unwrap();

        store
            .enqueue_conflict(conflict("c1", key.clone(), data(json!("s1")), 100))
            .unwrap();
        let refreshed = store
            .enqueue_conflict(conflict("c2", key.clone(), data(json!("s2")), 200))
            .unwrap();
        assert_eq!(refreshed.conflict_id, "c1");
        assert_eq!(refreshed.server_data, data(json!("s2")));
        assert_eq!(refreshed.timestamp, 100);
        assert_eq!(store.list_pending_conflicts().unwrap().len(), 1);

        clock.advance(10);
        let record = store.resolve_conflict("c1", data(json!("chosen"))).unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.payload, data(json!("chosen")));

        let resolved = store.get_conflict("c1").unwrap().unwrap();
        assert!(!resolved.is_pending());
        assert_eq!(resolved.resolved_at, Some(1_010));
        assert!(store.open_conflict_for(&key).unwrap().is_none());

        assert!(matches!(
            store.resolve_conflict("c1", data(json!("again"))),
            Err(StoreError::ConflictAlreadyResolved(_))
        ));
        assert!(matches!(
            store.resolve_conflict("nope", data(json!(0))),
            Err(StoreError::ConflictNotFound(_))
        ));
    }

    #[test]
    fn mark_missing_record_fails() {
        let (_, _, store) = new_store();
        assert!(matches!(
            store.mark_sync_status(&RecordKey::new("note", "x"), SyncStatus::Synced),
            Err(StoreError::RecordNotFound(_))
        ));
    }

    #[test]
    fn watermark_is_monotonic() {
        let (_, _, store) = new_store();
        assert_eq!(store.last_sync_time().unwrap(), None);
        store.advance_last_sync_time(500).unwrap();
        store.advance_last_sync_time(400).unwrap();
        assert_eq!(store.last_sync_time().unwrap(), Some(500));
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let (_, journal, store) = new_store();
        store.put("note", "a", data(json!(1))).unwrap();

        journal.set_failing(true);
        assert!(matches!(
            store.put("note", "a", data(json!(2))),
            Err(StoreError::Unavailable(_))
        ));
        let record = store.get("note", "a").unwrap().unwrap();
        assert_eq!(record.payload, data(json!(1)));
        assert_eq!(record.version, 1);
    }

    #[test]
    fn reopen_replays_everything() {
        let (clock, journal, store) = new_store();
        store.put("note", "a", data(json!(1))).unwrap();
        store.put("note", "b", data(json!(2))).unwrap();
        let seq = store.list_pending_sync().unwrap()[1].seq;
        store.fail_pending(seq, "rejected").unwrap();
        store.advance_last_sync_time(900).unwrap();
        let summary = store.summary().unwrap();
        drop(store);

        let reopened = store_at(&clock, journal);
        assert_eq!(reopened.summary().unwrap(), summary);
        assert_eq!(reopened.records().unwrap().len(), 2);

        reopened.put("note", "c", data(json!(3))).unwrap();
        let seqs: Vec<_> = reopened
            .list_pending_sync()
            .unwrap()
            .iter()
            .map(|e| e.seq)
            .collect();
        assert!(seqs.iter().all(|s| *s != seq), "sequence numbers are not reused");
    }

    #[test]
    fn compaction_preserves_state() {
        let clock = Arc::new(ManualClock::new(0));
        let journal = MemoryJournal::new();
        let store = Store::open(
            journal.clone(),
            clock.clone(),
            StoreConfig::default().compact_after(Some(4)),
        )
        .unwrap();

        for i in 0..10 {
            store.put("note", "a", data(json!(i))).unwrap();
        }
        let before = journal.data().len();
        store.compact().unwrap();
        assert!(journal.data().len() <= before);
        drop(store);

        let reopened = store_at(&clock, journal);
        let record = reopened.get("note", "a").unwrap().unwrap();
        assert_eq!(record.payload, data(json!(9)));
        assert_eq!(record.version, 10);
        assert_eq!(reopened.list_pending_sync().unwrap().len(), 1);
    }

    /// Leaves half of the next frame behind and then fails.
    struct ShortWriteJournal {
        inner: MemoryJournal,
        short: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Journal for ShortWriteJournal {
        fn read_all(&mut self) -> StoreResult<Vec<u8>> {
            self.inner.read_all()
        }

        fn append(&mut self, frame: &[u8]) -> StoreResult<()> {
            if self.short.swap(false, Ordering::SeqCst) {
                self.inner.append(&frame[..frame.len() / 2])?;
                return Err(StoreError::Unavailable("disk full".into()));
            }
            self.inner.append(frame)
        }

        fn sync(&mut self) -> StoreResult<()> {
            self.inner.sync()
        }

        fn truncate(&mut self, len: u64) -> StoreResult<()> {
            self.inner.truncate(len)
        }

        fn replace(&mut self, contents: &[u8]) -> StoreResult<()> {
            self.inner.replace(contents)
        }

        fn size(&self) -> StoreResult<u64> {
            self.inner.size()
        }
    }

    #[test]
    fn short_write_is_rolled_back() {
        let clock = Arc::new(ManualClock::new(1_000));
        let inner = MemoryJournal::new();
        let short = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let journal = ShortWriteJournal {
            inner: inner.clone(),
            short: short.clone(),
        };
        let store = Store::open(journal, clock.clone(), StoreConfig::default()).unwrap();

        store.put("note", "a", data(json!(1))).unwrap();
        let intact = inner.data().len();

        short.store(true, Ordering::SeqCst);
        assert!(store.put("note", "b", data(json!(2))).is_err());
        assert_eq!(inner.data().len(), intact);
        assert!(store.get("note", "b").unwrap().is_none());

        store.put("note", "c", data(json!(3))).unwrap();
        drop(store);

        let reopened = store_at(&clock, inner);
        let ids: Vec<_> = reopened
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.key.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }
}
