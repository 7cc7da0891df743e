//! Configuration for the sync engine.

use mendsync_protocol::{ConflictPolicy, CriticalTypes, ShallowMerge, MAX_RETRIES};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Default interval between timer-triggered cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between timer-triggered cycles.
    pub sync_interval: Duration,
    /// Push attempts before an entry moves to the failed queue.
    pub max_retries: u32,
    /// Backoff between push attempts.
    pub retry: RetryConfig,
    /// Record types whose remote data always wins.
    pub critical_types: CriticalTypes,
    /// Record types merged with the shallow merger.
    pub merge_types: BTreeSet<String>,
    /// Whether types without a registered merger use the shallow merger.
    pub merge_by_default: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_retries: MAX_RETRIES,
            retry: RetryConfig::default(),
            critical_types: CriticalTypes::new(),
            merge_types: BTreeSet::new(),
            merge_by_default: true,
        }
    }

    /// Sets the timer interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the number of push attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Marks a record type as critical.
    pub fn with_critical_type(mut self, record_type: impl Into<String>) -> Self {
        self.critical_types.insert(record_type);
        self
    }

    /// Registers the shallow merger for a record type.
    pub fn with_merge_type(mut self, record_type: impl Into<String>) -> Self {
        self.merge_types.insert(record_type.into());
        self
    }

    /// Sets whether unregistered types fall back to the shallow merger.
    pub fn with_merge_by_default(mut self, enabled: bool) -> Self {
        self.merge_by_default = enabled;
        self
    }

    /// Builds the conflict policy described by this configuration.
    pub fn policy(&self) -> ConflictPolicy {
        let mut policy = ConflictPolicy::new(self.critical_types.clone());
        for record_type in &self.merge_types {
            policy = policy.with_shallow_merge(record_type.clone());
        }
        if self.merge_by_default {
            policy = policy.with_default_merger(Arc::new(ShallowMerge));
        }
        policy
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff between push attempts of one entry.
///
/// With the default zero `initial_delay` a failed push is retried on the next
/// cycle. A non-zero delay holds the entry back for that long.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration that retries on the next cycle.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates an exponential backoff starting at `initial_delay`.
    pub fn exponential(initial_delay: Duration) -> Self {
        Self::new().with_initial_delay(initial_delay)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Returns true if failed pushes are held back at all.
    pub fn is_enabled(&self) -> bool {
        !self.initial_delay.is_zero()
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || !self.is_enabled() {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mendsync_protocol::{
        LocalRecord, Payload, RecordKey, ResolutionPolicy, ServerChangeEvent, Strategy, SyncStatus,
    };
    use serde_json::json;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_sync_interval(Duration::from_secs(60))
            .with_max_retries(5)
            .with_critical_type("medical_records");

        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert!(config.critical_types.contains("medical_records"));
        assert!(config.merge_by_default);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval, DEFAULT_SYNC_INTERVAL);
        assert_eq!(config.max_retries, 3);
        assert!(!config.retry.is_enabled());
    }

    #[test]
    fn policy_follows_merge_settings() {
        let strict = SyncConfig::new()
            .with_merge_by_default(false)
            .with_merge_type("note")
            .policy();
        assert!(strict.can_merge("note"));
        assert!(!strict.can_merge("task"));

        let loose = SyncConfig::new().policy();
        assert!(loose.can_merge("task"));
    }

    #[test]
    fn configured_critical_type_wins() {
        let policy = SyncConfig::new().with_critical_type("billing").policy();
        let local = LocalRecord {
            key: RecordKey::new("billing", "b1"),
            payload: Payload::data(json!({"amount": 5})),
            local_timestamp: 900,
            sync_status: SyncStatus::Pending,
            version: 1,
        };
        let remote =
            ServerChangeEvent::new(local.key.clone(), Payload::data(json!({"amount": 7})), 100);
        assert_eq!(
            policy.resolve("billing", &local, &remote, 1_000).strategy,
            Strategy::ServerWins
        );
    }

    #[test]
    fn no_backoff_by_default() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(5), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config =
            RetryConfig::exponential(Duration::from_millis(100)).with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::exponential(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
