//! Cycle triggers and the background scheduler.
//!
//! Every trigger source (timer, connectivity, manual request, platform
//! background wake) is reduced to "request a cycle". The scheduler runs at
//! most one cycle at a time; requests arriving while a cycle runs are
//! dropped, not queued.

use crate::error::SyncError;
use crate::feed::RemoteChangeFeed;
use crate::manager::{CycleReport, SyncManager};
use mendsync_store::LocalStore;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// What asked for a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Periodic timer tick.
    Timer,
    /// The device came back online.
    ConnectivityRestored,
    /// An explicit request from the application or operator.
    Manual,
    /// The platform woke the process in the background.
    BackgroundWake,
}

impl Trigger {
    /// Returns the trigger name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::ConnectivityRestored => "connectivity_restored",
            Trigger::Manual => "manual",
            Trigger::BackgroundWake => "background_wake",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable handle for requesting cycles, usable from synchronous code.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl TriggerHandle {
    /// Requests a cycle. Returns false if the scheduler has stopped.
    pub fn request(&self, trigger: Trigger) -> bool {
        self.tx.send(trigger).is_ok()
    }

    /// Requests a manual cycle.
    pub fn sync_now(&self) -> bool {
        self.request(Trigger::Manual)
    }

    /// Signals that connectivity was restored.
    pub fn connectivity_restored(&self) -> bool {
        self.request(Trigger::ConnectivityRestored)
    }
}

/// A platform mechanism that wakes the process in the background.
///
/// Implementations register with the OS and call
/// [`TriggerHandle::request`] with [`Trigger::BackgroundWake`] when woken.
pub trait WakeSource: Send + Sync {
    /// Starts delivering wake-ups to `handle`.
    fn register(&self, handle: TriggerHandle);

    /// Stops delivering wake-ups.
    fn unregister(&self) {}
}

/// Counters kept by a running scheduler.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles_run: AtomicU64,
    triggers_dropped: AtomicU64,
}

impl SchedulerStats {
    /// Cycles the scheduler started.
    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::SeqCst)
    }

    /// Requests dropped because a cycle was already running.
    pub fn triggers_dropped(&self) -> u64 {
        self.triggers_dropped.load(Ordering::SeqCst)
    }
}

/// Drives a [`SyncManager`] from timer ticks and trigger requests.
pub struct SyncScheduler {
    handle: TriggerHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    stats: Arc<SchedulerStats>,
}

impl SyncScheduler {
    /// Spawns the scheduler on the current tokio runtime.
    ///
    /// The first timer tick fires after one full `interval`.
    pub fn spawn<F, S>(manager: Arc<SyncManager<F, S>>, interval: Duration) -> Self
    where
        F: RemoteChangeFeed + 'static,
        S: LocalStore + 'static,
    {
        Self::spawn_with_observer(manager, interval, |_| {})
    }

    /// Like [`SyncScheduler::spawn`], calling `observer` with each cycle outcome.
    pub fn spawn_with_observer<F, S, O>(
        manager: Arc<SyncManager<F, S>>,
        interval: Duration,
        observer: O,
    ) -> Self
    where
        F: RemoteChangeFeed + 'static,
        S: LocalStore + 'static,
        O: Fn(Result<&CycleReport, &SyncError>) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(SchedulerStats::default());

        let task = tokio::spawn(run_loop(
            manager,
            interval,
            rx,
            shutdown_rx,
            stats.clone(),
            Arc::new(observer),
        ));

        Self {
            handle: TriggerHandle { tx },
            shutdown: Some(shutdown_tx),
            task,
            stats,
        }
    }

    /// Returns a handle for requesting cycles.
    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Registers a background wake source.
    pub fn attach_wake_source(&self, source: &dyn WakeSource) {
        source.register(self.handle());
    }

    /// Returns the scheduler counters.
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Stops the scheduler, waiting for a running cycle to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(error = %err, "scheduler task ended abnormally");
        }
    }
}

async fn run_loop<F, S, O>(
    manager: Arc<SyncManager<F, S>>,
    interval: Duration,
    mut rx: mpsc::UnboundedReceiver<Trigger>,
    mut shutdown: oneshot::Receiver<()>,
    stats: Arc<SchedulerStats>,
    observer: Arc<O>,
) where
    F: RemoteChangeFeed + 'static,
    S: LocalStore + 'static,
    O: Fn(Result<&CycleReport, &SyncError>) + Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut running: Option<JoinHandle<()>> = None;

    tracing::info!(interval_secs = interval.as_secs(), "sync scheduler started");

    loop {
        let trigger = tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => Trigger::Timer,
            received = rx.recv() => match received {
                Some(trigger) => trigger,
                None => break,
            },
        };

        if running.as_ref().is_some_and(|task| !task.is_finished()) {
            stats.triggers_dropped.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(%trigger, "cycle already running, trigger dropped");
            continue;
        }

        stats.cycles_run.fetch_add(1, Ordering::SeqCst);
        let manager = manager.clone();
        let observer = observer.clone();
        let stats = stats.clone();
        running = Some(tokio::task::spawn_blocking(move || {
            let outcome = manager.run_cycle(trigger);
            if matches!(outcome, Err(SyncError::AlreadyRunning)) {
                stats.triggers_dropped.fetch_add(1, Ordering::SeqCst);
            }
            (*observer)(outcome.as_ref());
        }));
    }

    if let Some(task) = running {
        let _ = task.await;
    }
    tracing::info!("sync scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_names() {
        assert_eq!(Trigger::Timer.to_string(), "timer");
        assert_eq!(Trigger::BackgroundWake.as_str(), "background_wake");
    }

    #[test]
    fn handle_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TriggerHandle { tx };
        assert!(handle.sync_now());
        drop(rx);
        assert!(!handle.connectivity_restored());
    }
}
