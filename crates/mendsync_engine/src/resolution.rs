//! Manual resolution surface.
//!
//! Conflicts the policy could not settle wait here for a person (or an
//! operator tool) to pick the final payload. Committing a choice writes it
//! back as a fresh local edit, which the next cycle pushes.

use crate::error::{SyncError, SyncResult};
use mendsync_protocol::{
    ConflictRecord, FailedQueueEntry, LocalRecord, Payload, StatusSummary, SyncQueueEntry,
};
use mendsync_store::{LocalStore, StoreError};
use std::sync::Arc;

/// Exposes the conflict and failed queues for outside decisions.
#[derive(Debug)]
pub struct ResolutionSurface<S: LocalStore> {
    store: Arc<S>,
}

impl<S: LocalStore> Clone for ResolutionSurface<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: LocalStore> ResolutionSurface<S> {
    /// Creates a surface over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Lists unresolved conflicts, oldest first.
    pub fn list_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        Ok(self.store.list_pending_conflicts()?)
    }

    /// Returns one conflict, resolved or not.
    pub fn conflict(&self, conflict_id: &str) -> SyncResult<ConflictRecord> {
        self.store
            .get_conflict(conflict_id)?
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))
    }

    /// Finalizes a conflict with `chosen` as the record's new payload.
    ///
    /// The payload is written as a `Pending` local edit. Committing an
    /// already resolved conflict returns [`SyncError::ConflictAlreadyResolved`],
    /// which [`SyncError::is_benign`] reports as harmless.
    pub fn commit(&self, conflict_id: &str, chosen: Payload) -> SyncResult<LocalRecord> {
        let conflict = self.conflict(conflict_id)?;
        if !conflict.is_pending() {
            return Err(SyncError::ConflictAlreadyResolved(conflict_id.to_string()));
        }

        let record = self
            .store
            .resolve_conflict(conflict_id, chosen)
            .map_err(|err| match err {
                StoreError::ConflictNotFound(id) => SyncError::ConflictNotFound(id),
                StoreError::ConflictAlreadyResolved(id) => SyncError::ConflictAlreadyResolved(id),
                other => SyncError::Store(other),
            })?;

        tracing::info!(key = %record.key, conflict_id, "conflict committed");
        Ok(record)
    }

    /// Commits the local side of a conflict.
    pub fn keep_local(&self, conflict_id: &str) -> SyncResult<LocalRecord> {
        let conflict = self.conflict(conflict_id)?;
        self.commit(conflict_id, conflict.local_data)
    }

    /// Commits the server side of a conflict.
    pub fn accept_server(&self, conflict_id: &str) -> SyncResult<LocalRecord> {
        let conflict = self.conflict(conflict_id)?;
        self.commit(conflict_id, conflict.server_data)
    }

    /// Lists entries that exhausted their retries, oldest failure first.
    pub fn list_failed(&self) -> SyncResult<Vec<FailedQueueEntry>> {
        Ok(self.store.list_failed()?)
    }

    /// Puts a failed entry back in the pending queue with a fresh retry budget.
    pub fn resubmit_failed(&self, seq: u64) -> SyncResult<SyncQueueEntry> {
        let entry = self.store.resubmit_failed(seq)?;
        tracing::info!(key = %entry.key, seq, "failed entry resubmitted");
        Ok(entry)
    }

    /// Returns the status summary for display.
    pub fn status(&self) -> SyncResult<StatusSummary> {
        Ok(self.store.summary()?)
    }
}
