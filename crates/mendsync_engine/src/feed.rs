//! Remote change feed abstraction.

use crate::error::{SyncError, SyncResult};
use mendsync_protocol::{Clock, Payload, RecordKey, ServerChangeEvent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The remote side of synchronization.
///
/// This trait abstracts the remote service, allowing for different
/// implementations (HTTP, in-memory for testing, etc.). Pushes are upserts
/// and must be idempotent: pushing the same payload twice leaves the remote
/// state as pushing it once.
pub trait RemoteChangeFeed: Send + Sync {
    /// Returns every remote change with `remote_timestamp >= since`, in
    /// the order the remote applied them.
    fn pull(&self, since: i64) -> SyncResult<Vec<ServerChangeEvent>>;

    /// Upserts a record remotely.
    fn push(&self, key: &RecordKey, payload: &Payload) -> SyncResult<()>;

    /// Checks if the remote is reachable.
    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct FeedState {
    current: BTreeMap<RecordKey, ServerChangeEvent>,
    log: Vec<ServerChangeEvent>,
    offline: bool,
    fail_next_pushes: u32,
    failing_keys: BTreeMap<RecordKey, bool>,
}

impl FeedState {
    fn upsert(&mut self, event: ServerChangeEvent) -> bool {
        if self
            .current
            .get(&event.key)
            .is_some_and(|existing| existing.data == event.data)
        {
            return false;
        }
        self.current.insert(event.key.clone(), event.clone());
        self.log.push(event);
        true
    }
}

/// An in-memory remote service for testing.
///
/// Keeps the current remote value of every record plus a change log. Other
/// writers are simulated with [`MemoryFeed::inject`], outages and rejected
/// writes with the fault switches.
pub struct MemoryFeed {
    clock: Arc<dyn Clock>,
    state: Mutex<FeedState>,
    pushes: AtomicU64,
}

impl MemoryFeed {
    /// Creates an empty feed stamping pushes with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(FeedState::default()),
            pushes: AtomicU64::new(0),
        }
    }

    /// Records a change made by another client.
    pub fn inject(&self, key: RecordKey, payload: Payload, remote_timestamp: i64) {
        self.state
            .lock()
            .upsert(ServerChangeEvent::new(key, payload, remote_timestamp));
    }

    /// Returns the current remote value of a record.
    pub fn get(&self, key: &RecordKey) -> Option<ServerChangeEvent> {
        self.state.lock().current.get(key).cloned()
    }

    /// Returns the full change log.
    pub fn changes(&self) -> Vec<ServerChangeEvent> {
        self.state.lock().log.clone()
    }

    /// Returns the number of accepted pushes.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes the next `count` pushes fail with a retryable error.
    pub fn fail_next_pushes(&self, count: u32) {
        self.state.lock().fail_next_pushes = count;
    }

    /// Makes every push of `key` fail until cleared.
    pub fn fail_key(&self, key: RecordKey, retryable: bool) {
        self.state.lock().failing_keys.insert(key, retryable);
    }

    /// Clears a failure set with [`MemoryFeed::fail_key`].
    pub fn clear_failing_key(&self, key: &RecordKey) {
        self.state.lock().failing_keys.remove(key);
    }
}

impl RemoteChangeFeed for MemoryFeed {
    fn pull(&self, since: i64) -> SyncResult<Vec<ServerChangeEvent>> {
        let state = self.state.lock();
        if state.offline {
            return Err(SyncError::NotConnected);
        }
        Ok(state
            .log
            .iter()
            .filter(|event| event.remote_timestamp >= since)
            .cloned()
            .collect())
    }

    fn push(&self, key: &RecordKey, payload: &Payload) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(SyncError::NotConnected);
        }
        if state.fail_next_pushes > 0 {
            state.fail_next_pushes -= 1;
            return Err(SyncError::transport_retryable(format!(
                "injected push failure for {key}"
            )));
        }
        if let Some(&retryable) = state.failing_keys.get(key) {
            return Err(SyncError::Transport {
                message: format!("remote rejected {key}"),
                retryable,
            });
        }

        let event = ServerChangeEvent::new(key.clone(), payload.clone(), self.clock.now_millis());
        if !state.upsert(event) {
            tracing::trace!(key = %key, "push matched remote value");
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().offline
    }
}

impl std::fmt::Debug for MemoryFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryFeed")
            .field("records", &state.current.len())
            .field("changes", &state.log.len())
            .field("offline", &state.offline)
            .finish()
    }
}
