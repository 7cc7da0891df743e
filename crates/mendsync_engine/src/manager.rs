//! The sync manager.
//!
//! A cycle runs two phases against the local store:
//!
//! 1. **Push**: every due pending entry is upserted remotely in enqueue
//!    order. Failures are retried in later cycles until the retry budget is
//!    spent, then the entry moves to the failed queue.
//! 2. **Pull**: every remote change since the last sync time is applied in
//!    feed order, consulting the resolution policy when the local record has
//!    unpushed edits.
//!
//! Only one cycle runs at a time. A request made while a cycle runs is
//! rejected with [`SyncError::AlreadyRunning`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::feed::RemoteChangeFeed;
use crate::scheduler::Trigger;
use mendsync_protocol::{
    Clock, ConflictRecord, LocalRecord, Payload, ResolutionPolicy, ServerChangeEvent,
    StatusSummary, Strategy, SyncQueueEntry, SyncStatus,
};
use mendsync_store::{LocalStore, StoreError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Times one remote change is decided before the cycle gives up on it.
const MAX_APPLY_ATTEMPTS: u32 = 3;

/// The current state of the sync manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle is running.
    Idle,
    /// A cycle is running.
    Running,
}

impl SyncState {
    /// Returns true if a new cycle can start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle)
    }
}

/// Cumulative statistics across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles that aborted.
    pub cycles_aborted: u64,
    /// Requests rejected because a cycle was running.
    pub requests_rejected: u64,
    /// Entries pushed successfully.
    pub records_pushed: u64,
    /// Remote changes received.
    pub changes_pulled: u64,
    /// Push attempts that failed.
    pub push_failures: u64,
    /// Conflicts recorded for manual resolution.
    pub conflicts_recorded: u64,
    /// Start time of the last completed cycle (ms).
    pub last_cycle_at: Option<i64>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// What started the cycle.
    pub trigger: Trigger,
    /// Clock reading at cycle start (ms).
    pub started_at: i64,
    /// Entries pushed and acknowledged.
    pub pushed: u64,
    /// Entries whose push failed and will be retried.
    pub retried: u64,
    /// Entries moved to the failed queue.
    pub failed: u64,
    /// Entries held back by an open conflict or a backoff delay.
    pub held: u64,
    /// Remote changes received.
    pub pulled: u64,
    /// Remote changes written locally.
    pub applied: u64,
    /// Remote changes discarded in favour of local edits.
    pub kept_local: u64,
    /// Remote changes merged with local edits.
    pub merged: u64,
    /// Conflicts recorded or refreshed.
    pub conflicts: u64,
    /// Remote changes that matched the local record.
    pub unchanged: u64,
    /// Per-item errors. None of them stopped the cycle.
    pub errors: Vec<String>,
    /// Whether the last sync time moved to `started_at`.
    pub advanced_last_sync: bool,
    /// Wall time spent in the cycle.
    pub duration: Duration,
}

impl CycleReport {
    fn new(trigger: Trigger, started_at: i64) -> Self {
        Self {
            trigger,
            started_at,
            pushed: 0,
            retried: 0,
            failed: 0,
            held: 0,
            pulled: 0,
            applied: 0,
            kept_local: 0,
            merged: 0,
            conflicts: 0,
            unchanged: 0,
            errors: Vec::new(),
            advanced_last_sync: false,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if no item reported an error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Clears the running flag when a cycle ends, including on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn abort(context: &str, err: StoreError) -> SyncError {
    SyncError::CycleAbort(format!("{context}: {err}"))
}

/// Orchestrates sync cycles between a local store and a remote feed.
///
/// Construct one per process and share it behind an `Arc`.
pub struct SyncManager<F: RemoteChangeFeed, S: LocalStore> {
    config: SyncConfig,
    feed: Arc<F>,
    store: Arc<S>,
    policy: Arc<dyn ResolutionPolicy>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl<F: RemoteChangeFeed, S: LocalStore> SyncManager<F, S> {
    /// Creates a manager using the policy described by `config`.
    pub fn new(config: SyncConfig, feed: Arc<F>, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let policy: Arc<dyn ResolutionPolicy> = Arc::new(config.policy());
        Self {
            config,
            feed,
            store,
            policy,
            clock,
            running: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replaces the resolution policy.
    pub fn with_policy(mut self, policy: Arc<dyn ResolutionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        if self.running.load(Ordering::Acquire) {
            SyncState::Running
        } else {
            SyncState::Idle
        }
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the remote feed.
    pub fn feed(&self) -> &Arc<F> {
        &self.feed
    }

    /// Returns queue and conflict counts.
    pub fn status(&self) -> SyncResult<StatusSummary> {
        Ok(self.store.summary()?)
    }

    /// Runs one push-then-pull cycle.
    ///
    /// Returns [`SyncError::AlreadyRunning`] without doing anything if a
    /// cycle is in progress, and [`SyncError::CycleAbort`] if the feed is
    /// unreachable or the store fails during bookkeeping. Per-item failures
    /// are collected in the report instead.
    pub fn run_cycle(&self, trigger: Trigger) -> SyncResult<CycleReport> {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            self.stats.write().requests_rejected += 1;
            tracing::debug!(%trigger, "sync cycle already running");
            return Err(SyncError::AlreadyRunning);
        };

        let start = Instant::now();
        let started_at = self.clock.now_millis();
        let mut report = CycleReport::new(trigger, started_at);
        tracing::debug!(%trigger, started_at, "sync cycle started");

        let outcome = self.run_phases(&mut report);
        report.duration = start.elapsed();

        let mut stats = self.stats.write();
        stats.records_pushed += report.pushed;
        stats.changes_pulled += report.pulled;
        stats.push_failures += report.retried + report.failed;
        stats.conflicts_recorded += report.conflicts;

        match outcome {
            Ok(()) => {
                stats.cycles_completed += 1;
                stats.last_cycle_at = Some(started_at);
                stats.last_error = report.errors.last().cloned();
                tracing::info!(
                    %trigger,
                    pushed = report.pushed,
                    retried = report.retried,
                    failed = report.failed,
                    pulled = report.pulled,
                    conflicts = report.conflicts,
                    errors = report.errors.len(),
                    advanced = report.advanced_last_sync,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync cycle finished"
                );
                Ok(report)
            }
            Err(err) => {
                stats.cycles_aborted += 1;
                stats.last_error = Some(err.to_string());
                tracing::warn!(%trigger, error = %err, "sync cycle aborted");
                Err(err)
            }
        }
    }

    fn run_phases(&self, report: &mut CycleReport) -> SyncResult<()> {
        if !self.feed.is_connected() {
            return Err(SyncError::CycleAbort("remote feed is not connected".into()));
        }
        self.push_phase(report)?;
        self.pull_phase(report)
    }

    fn push_phase(&self, report: &mut CycleReport) -> SyncResult<()> {
        let now = report.started_at;
        let entries = self
            .store
            .list_pending_sync()
            .map_err(|e| abort("listing pending entries", e))?;

        for entry in entries {
            if !entry.is_due(now) {
                report.held += 1;
                continue;
            }
            if self
                .store
                .open_conflict_for(&entry.key)
                .map_err(|e| abort("checking conflicts", e))?
                .is_some()
            {
                tracing::debug!(key = %entry.key, seq = entry.seq, "push held by open conflict");
                report.held += 1;
                continue;
            }

            match self.feed.push(&entry.key, &entry.payload) {
                Ok(()) => {
                    let settled = self
                        .store
                        .acknowledge_push(entry.seq, &entry.payload)
                        .map_err(|e| abort("acknowledging push", e))?;
                    if !settled {
                        tracing::debug!(
                            key = %entry.key,
                            seq = entry.seq,
                            "newer edit stays queued"
                        );
                    }
                    report.pushed += 1;
                }
                Err(err) => self.handle_push_failure(&entry, err, report)?,
            }
        }
        Ok(())
    }

    fn handle_push_failure(
        &self,
        entry: &SyncQueueEntry,
        err: SyncError,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let attempt = entry.retry_count + 1;

        if !err.is_retryable() || entry.is_last_attempt(self.config.max_retries) {
            self.store
                .fail_pending(entry.seq, &err.to_string())
                .map_err(|e| abort("moving entry to failed queue", e))?;
            let terminal = SyncError::TerminalPush {
                key: entry.key.clone(),
                message: err.to_string(),
            };
            tracing::warn!(
                key = %entry.key,
                seq = entry.seq,
                attempt,
                error = %err,
                "push failed permanently"
            );
            report.failed += 1;
            report.errors.push(terminal.to_string());
            return Ok(());
        }

        let delay = self.config.retry.delay_for_attempt(attempt);
        let not_before = (!delay.is_zero()).then(|| report.started_at + delay.as_millis() as i64);
        let retry_count = self
            .store
            .retry_pending(entry.seq, not_before)
            .map_err(|e| abort("scheduling retry", e))?;

        let transient = SyncError::TransientPush {
            key: entry.key.clone(),
            attempt,
            message: err.to_string(),
        };
        tracing::warn!(
            key = %entry.key,
            seq = entry.seq,
            retry_count,
            error = %err,
            "push failed, will retry"
        );
        report.retried += 1;
        report.errors.push(transient.to_string());
        Ok(())
    }

    fn pull_phase(&self, report: &mut CycleReport) -> SyncResult<()> {
        let since = self
            .store
            .last_sync_time()
            .map_err(|e| abort("reading last sync time", e))?
            .unwrap_or(0);
        let events = self
            .feed
            .pull(since)
            .map_err(|e| SyncError::CycleAbort(format!("pull failed: {e}")))?;
        report.pulled = events.len() as u64;

        let mut all_applied = true;
        for event in &events {
            if let Err(err) = self.apply_event(event, report) {
                all_applied = false;
                let err = match err {
                    err @ SyncError::PullApply { .. } => err,
                    other => SyncError::PullApply {
                        key: event.key.clone(),
                        message: other.to_string(),
                    },
                };
                tracing::warn!(key = %event.key, error = %err, "remote change not applied");
                report.errors.push(err.to_string());
            }
        }

        if all_applied {
            self.store
                .advance_last_sync_time(report.started_at)
                .map_err(|e| abort("advancing last sync time", e))?;
            report.advanced_last_sync = true;
        }
        Ok(())
    }

    /// Applies one remote change, deciding again whenever a local write lands
    /// between reading the record and writing it.
    fn apply_event(&self, event: &ServerChangeEvent, report: &mut CycleReport) -> SyncResult<()> {
        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            if self.try_apply_event(event, report)? {
                return Ok(());
            }
            tracing::debug!(
                key = %event.key,
                attempt,
                "record changed during apply, deciding again"
            );
        }
        Err(SyncError::PullApply {
            key: event.key.clone(),
            message: format!("record kept changing across {MAX_APPLY_ATTEMPTS} attempts"),
        })
    }

    /// Returns false if the record moved before the decision could be written.
    fn try_apply_event(
        &self,
        event: &ServerChangeEvent,
        report: &mut CycleReport,
    ) -> SyncResult<bool> {
        let key = &event.key;

        if let Some(open) = self.store.open_conflict_for(key)? {
            self.record_conflict(&open.local_data, event, report)?;
            return Ok(true);
        }

        let Some(local) = self.store.get(&key.record_type, &key.id)? else {
            if self.store.apply_remote(event, None)?.is_none() {
                return Ok(false);
            }
            report.applied += 1;
            return Ok(true);
        };

        match local.sync_status {
            SyncStatus::Synced if local.payload == event.data => {
                report.unchanged += 1;
            }
            SyncStatus::Synced => {
                if self.store.apply_remote(event, Some(&local))?.is_none() {
                    return Ok(false);
                }
                report.applied += 1;
            }
            SyncStatus::Failed => {
                // Failed items wait for the operator; never overwrite them.
                self.record_conflict(&local.payload, event, report)?;
            }
            SyncStatus::Pending => return self.resolve_pending(&local, event, report),
        }
        Ok(true)
    }

    fn resolve_pending(
        &self,
        local: &LocalRecord,
        event: &ServerChangeEvent,
        report: &mut CycleReport,
    ) -> SyncResult<bool> {
        let merged_at = self.clock.now_millis();
        let resolution = self
            .policy
            .resolve(&event.key.record_type, local, event, merged_at);
        tracing::debug!(
            key = %event.key,
            strategy = %resolution.strategy,
            "conflict resolved by policy"
        );

        match (resolution.strategy, resolution.merged) {
            (Strategy::ServerWins, _) => {
                if self.store.apply_remote(event, Some(local))?.is_none() {
                    return Ok(false);
                }
                report.applied += 1;
            }
            (Strategy::ClientWins, _) => {
                report.kept_local += 1;
            }
            (Strategy::Merge, Some(merged)) => {
                if self.store.write_merged(local, merged, merged_at)?.is_none() {
                    return Ok(false);
                }
                report.merged += 1;
            }
            (Strategy::Merge, None) => {
                let violation = SyncError::ConflictPolicyViolation {
                    key: event.key.clone(),
                    message: "merge returned without a merged payload".into(),
                };
                tracing::warn!(key = %event.key, error = %violation, "treating as manual");
                report.errors.push(violation.to_string());
                self.record_conflict(&local.payload, event, report)?;
            }
            (Strategy::Manual, _) => {
                self.record_conflict(&local.payload, event, report)?;
            }
        }
        Ok(true)
    }

    fn record_conflict(
        &self,
        local_data: &Payload,
        event: &ServerChangeEvent,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let conflict = ConflictRecord::new(
            uuid::Uuid::new_v4().to_string(),
            event.key.clone(),
            local_data.clone(),
            event.data.clone(),
            event.remote_timestamp,
            self.clock.now_millis(),
        );
        let stored = self.store.enqueue_conflict(conflict)?;
        tracing::info!(key = %event.key, conflict_id = %stored.conflict_id, "conflict recorded");
        report.conflicts += 1;
        Ok(())
    }
}

impl<F: RemoteChangeFeed, S: LocalStore> std::fmt::Debug for SyncManager<F, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use mendsync_protocol::{FailedQueueEntry, ManualClock, RecordKey, Resolution};
    use mendsync_store::{MemoryJournal, Store, StoreConfig, StoreResult};
    use serde_json::json;

    type TestManager = SyncManager<MemoryFeed, Store<MemoryJournal>>;

    struct Fixture {
        clock: Arc<ManualClock>,
        journal: MemoryJournal,
        feed: Arc<MemoryFeed>,
        store: Arc<Store<MemoryJournal>>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(1_000));
            let journal = MemoryJournal::new();
            let store = Arc::new(
                Store::open(journal.clone(), clock.clone(), StoreConfig::default()).unwrap(),
            );
            let feed = Arc::new(MemoryFeed::new(clock.clone()));
            Self {
                clock,
                journal,
                feed,
                store,
            }
        }

        fn manager(&self, config: SyncConfig) -> TestManager {
            SyncManager::new(config, self.feed.clone(), self.store.clone(), self.clock.clone())
        }
    }

    fn key(id: &str) -> RecordKey {
        RecordKey::new("note", id)
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(!SyncState::Running.can_start_sync());
    }

    #[test]
    fn running_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = RunningGuard::acquire(&flag).unwrap();
        assert!(RunningGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(RunningGuard::acquire(&flag).is_some());
    }

    #[test]
    fn push_then_pull_round_trip() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.store.put("note", "a", json!({"text": "hi"}).into()).unwrap();

        let report = manager.run_cycle(Trigger::Manual).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pulled, 1);
        assert_eq!(report.unchanged, 1);
        assert!(report.advanced_last_sync);
        assert!(report.is_clean());

        assert_eq!(
            fx.store.get("note", "a").unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );
        assert_eq!(fx.store.last_sync_time().unwrap(), Some(1_000));
        assert_eq!(manager.stats().cycles_completed, 1);
        assert_eq!(manager.state(), SyncState::Idle);
    }

    #[test]
    fn remote_only_record_is_written() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.feed.inject(key("r"), Payload::data(json!({"from": "server"})), 900);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.applied, 1);
        let record = fx.store.get("note", "r").unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.local_timestamp, 900);
    }

    #[test]
    fn offline_feed_aborts_without_spending_retries() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.store.put("note", "a", json!(1).into()).unwrap();
        fx.feed.set_offline(true);

        let err = manager.run_cycle(Trigger::Timer).unwrap_err();
        assert!(matches!(err, SyncError::CycleAbort(_)));
        assert_eq!(fx.store.list_pending_sync().unwrap()[0].retry_count, 0);
        assert_eq!(fx.store.last_sync_time().unwrap(), None);
        assert_eq!(manager.stats().cycles_aborted, 1);
        assert_eq!(manager.state(), SyncState::Idle);
    }

    #[test]
    fn transient_failure_retries_next_cycle() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.store.put("note", "a", json!(1).into()).unwrap();
        fx.feed.fail_next_pushes(1);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(fx.store.list_pending_sync().unwrap()[0].retry_count, 1);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.pushed, 1);
        assert!(fx.store.list_pending_sync().unwrap().is_empty());
    }

    #[test]
    fn rejected_push_fails_immediately() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.store.put("note", "a", json!(1).into()).unwrap();
        fx.feed.fail_key(key("a"), false);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(fx.store.list_failed().unwrap().len(), 1);
        assert_eq!(
            fx.store.get("note", "a").unwrap().unwrap().sync_status,
            SyncStatus::Failed
        );
    }

    #[test]
    fn backoff_holds_entry() {
        let fx = Fixture::new();
        let config = SyncConfig::default().with_retry(
            crate::config::RetryConfig::exponential(Duration::from_secs(10)).with_jitter(false),
        );
        let manager = fx.manager(config);
        fx.store.put("note", "a", json!(1).into()).unwrap();
        fx.feed.fail_next_pushes(1);

        manager.run_cycle(Trigger::Timer).unwrap();
        let entry = fx.store.list_pending_sync().unwrap().remove(0);
        assert_eq!(entry.not_before, Some(11_000));

        fx.clock.advance(5_000);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.held, 1);

        fx.clock.advance(5_000);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.pushed, 1);
    }

    #[test]
    fn newer_local_edit_wins() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.feed.fail_next_pushes(1);
        fx.store.put("note", "a", json!({"v": "local"}).into()).unwrap();
        fx.feed.inject(key("a"), Payload::data(json!({"v": "old server"})), 500);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.kept_local, 1);
        let record = fx.store.get("note", "a").unwrap().unwrap();
        assert_eq!(record.payload, Payload::data(json!({"v": "local"})));
        assert_eq!(record.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn newer_remote_change_wins() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.feed.fail_next_pushes(1);
        fx.store.put("note", "a", json!({"v": "local"}).into()).unwrap();
        fx.feed.inject(key("a"), Payload::data(json!({"v": "server"})), 2_000);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.applied, 1);
        let record = fx.store.get("note", "a").unwrap().unwrap();
        assert_eq!(record.payload, Payload::data(json!({"v": "server"})));
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert!(fx.store.list_pending_sync().unwrap().is_empty());
    }

    #[test]
    fn failed_record_becomes_conflict() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.store.put("note", "a", json!({"v": "local"}).into()).unwrap();
        fx.feed.fail_key(key("a"), false);
        manager.run_cycle(Trigger::Timer).unwrap();

        fx.feed.inject(key("a"), Payload::data(json!({"v": "server"})), 5_000);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.conflicts, 1);

        let record = fx.store.get("note", "a").unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Failed);
        assert_eq!(record.payload, Payload::data(json!({"v": "local"})));
    }

    #[test]
    fn open_conflict_holds_push_and_absorbs_changes() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default().with_merge_by_default(false));
        fx.feed.fail_next_pushes(1);
        fx.store.put("note", "a", json!({"v": "local"}).into()).unwrap();
        fx.feed.inject(key("a"), Payload::data(json!({"v": "s1"})), 1_000);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.conflicts, 1);

        fx.feed.inject(key("a"), Payload::data(json!({"v": "s2"})), 1_000);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.held, 1);
        assert_eq!(report.pushed, 0);

        let conflicts = fx.store.list_pending_conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].server_data, Payload::data(json!({"v": "s2"})));
    }

    struct BrokenMerge;

    impl ResolutionPolicy for BrokenMerge {
        fn resolve(&self, _: &str, _: &LocalRecord, _: &ServerChangeEvent, _: i64) -> Resolution {
            Resolution {
                strategy: Strategy::Merge,
                merged: None,
            }
        }
    }

    #[test]
    fn merge_without_payload_is_manual() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default()).with_policy(Arc::new(BrokenMerge));
        fx.feed.fail_next_pushes(1);
        fx.store.put("note", "a", json!({"v": "local"}).into()).unwrap();
        fx.feed.inject(key("a"), Payload::data(json!({"v": "server"})), 1_000);

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.conflicts, 1);
        assert!(report.errors.iter().any(|e| e.contains("policy violation")));
    }

    #[test]
    fn store_failure_aborts_cycle() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.store.put("note", "a", json!(1).into()).unwrap();
        fx.journal.set_failing(true);

        let err = manager.run_cycle(Trigger::Timer).unwrap_err();
        assert!(matches!(err, SyncError::CycleAbort(_)));
        assert_eq!(manager.state(), SyncState::Idle);

        fx.journal.set_failing(false);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(fx.feed.get(&key("a")).unwrap().data, Payload::data(json!(1)));
    }

    #[test]
    fn change_stamped_at_last_sync_time_is_pulled_again() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        fx.feed.inject(key("a"), Payload::data(json!("seen")), 900);
        manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(fx.store.last_sync_time().unwrap(), Some(1_000));

        // Written remotely in the millisecond the previous cycle started.
        fx.feed.inject(key("b"), Payload::data(json!("late")), 1_000);
        fx.clock.advance(500);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(
            fx.store.get("note", "b").unwrap().unwrap().payload,
            Payload::data(json!("late"))
        );

        fx.clock.advance(500);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.pulled, 0);
    }

    #[test]
    fn apply_failure_keeps_last_sync_time() {
        let fx = Fixture::new();
        let manager = fx.manager(SyncConfig::default());
        manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(fx.store.last_sync_time().unwrap(), Some(1_000));

        fx.clock.advance(1_000);
        fx.feed.inject(key("r"), Payload::data(json!(1)), 1_500);
        fx.journal.set_failing(true);
        let report = manager.run_cycle(Trigger::Timer).unwrap();
        fx.journal.set_failing(false);

        assert!(!report.advanced_last_sync);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(fx.store.last_sync_time().unwrap(), Some(1_000));

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(report.applied, 1);
        assert!(fx.store.get("note", "r").unwrap().is_some());
    }

    /// Lands one user edit right after the next `get`, like a UI write
    /// racing the pull phase.
    struct RacingStore {
        inner: Arc<Store<MemoryJournal>>,
        edit: parking_lot::Mutex<Option<(RecordKey, Payload)>>,
    }

    impl LocalStore for RacingStore {
        fn put(&self, record_type: &str, id: &str, payload: Payload) -> StoreResult<LocalRecord> {
            self.inner.put(record_type, id, payload)
        }

        fn get(&self, record_type: &str, id: &str) -> StoreResult<Option<LocalRecord>> {
            let record = self.inner.get(record_type, id)?;
            if let Some((key, payload)) = self.edit.lock().take() {
                self.inner.put(&key.record_type, &key.id, payload)?;
            }
            Ok(record)
        }

        fn records(&self) -> StoreResult<Vec<LocalRecord>> {
            self.inner.records()
        }

        fn list_pending_sync(&self) -> StoreResult<Vec<SyncQueueEntry>> {
            self.inner.list_pending_sync()
        }

        fn list_failed(&self) -> StoreResult<Vec<FailedQueueEntry>> {
            self.inner.list_failed()
        }

        fn list_pending_conflicts(&self) -> StoreResult<Vec<ConflictRecord>> {
            self.inner.list_pending_conflicts()
        }

        fn list_conflicts(&self) -> StoreResult<Vec<ConflictRecord>> {
            self.inner.list_conflicts()
        }

        fn get_conflict(&self, conflict_id: &str) -> StoreResult<Option<ConflictRecord>> {
            self.inner.get_conflict(conflict_id)
        }

        fn open_conflict_for(&self, key: &RecordKey) -> StoreResult<Option<ConflictRecord>> {
            self.inner.open_conflict_for(key)
        }

        fn mark_sync_status(&self, key: &RecordKey, status: SyncStatus) -> StoreResult<()> {
            self.inner.mark_sync_status(key, status)
        }

        fn enqueue_conflict(&self, conflict: ConflictRecord) -> StoreResult<ConflictRecord> {
            self.inner.enqueue_conflict(conflict)
        }

        fn resolve_conflict(
            &self,
            conflict_id: &str,
            resolved: Payload,
        ) -> StoreResult<LocalRecord> {
            self.inner.resolve_conflict(conflict_id, resolved)
        }

        fn acknowledge_push(&self, seq: u64, pushed: &Payload) -> StoreResult<bool> {
            self.inner.acknowledge_push(seq, pushed)
        }

        fn retry_pending(&self, seq: u64, not_before: Option<i64>) -> StoreResult<u32> {
            self.inner.retry_pending(seq, not_before)
        }

        fn fail_pending(&self, seq: u64, reason: &str) -> StoreResult<FailedQueueEntry> {
            self.inner.fail_pending(seq, reason)
        }

        fn apply_remote(
            &self,
            event: &ServerChangeEvent,
            seen: Option<&LocalRecord>,
        ) -> StoreResult<Option<LocalRecord>> {
            self.inner.apply_remote(event, seen)
        }

        fn write_merged(
            &self,
            seen: &LocalRecord,
            payload: Payload,
            timestamp: i64,
        ) -> StoreResult<Option<LocalRecord>> {
            self.inner.write_merged(seen, payload, timestamp)
        }

        fn resubmit_failed(&self, seq: u64) -> StoreResult<SyncQueueEntry> {
            self.inner.resubmit_failed(seq)
        }

        fn last_sync_time(&self) -> StoreResult<Option<i64>> {
            self.inner.last_sync_time()
        }

        fn advance_last_sync_time(&self, time: i64) -> StoreResult<()> {
            self.inner.advance_last_sync_time(time)
        }

        fn summary(&self) -> StoreResult<StatusSummary> {
            self.inner.summary()
        }
    }

    #[test]
    fn local_edit_during_pull_is_not_overwritten() {
        let fx = Fixture::new();
        let racing = Arc::new(RacingStore {
            inner: fx.store.clone(),
            edit: parking_lot::Mutex::new(None),
        });
        let manager = SyncManager::new(
            SyncConfig::default(),
            fx.feed.clone(),
            racing.clone(),
            fx.clock.clone(),
        );

        fx.feed.inject(key("a"), Payload::data(json!({"v": "s1"})), 900);
        manager.run_cycle(Trigger::Timer).unwrap();
        assert_eq!(
            fx.store.get("note", "a").unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );

        fx.clock.advance(1_000);
        fx.feed.inject(key("a"), Payload::data(json!({"v": "s2"})), 1_050);
        let user_edit = Payload::data(json!({"v": "user edit during cycle"}));
        *racing.edit.lock() = Some((key("a"), user_edit.clone()));

        let report = manager.run_cycle(Trigger::Timer).unwrap();
        assert!(racing.edit.lock().is_none());
        assert_eq!(report.applied, 0);
        assert_eq!(report.kept_local, 1);
        assert!(report.advanced_last_sync);

        let record = fx.store.get("note", "a").unwrap().unwrap();
        assert_eq!(record.payload, user_edit);
        assert_eq!(record.sync_status, SyncStatus::Pending);
        let pending = fx.store.list_pending_sync().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, user_edit);
    }
}
