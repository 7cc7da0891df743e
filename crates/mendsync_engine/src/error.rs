//! Error types for the sync engine.

use mendsync_protocol::RecordKey;
use mendsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A push failed and will be retried in a later cycle.
    #[error("push of {key} failed (attempt {attempt}): {message}")]
    TransientPush {
        /// Record that failed to push.
        key: RecordKey,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Underlying failure.
        message: String,
    },

    /// A push failed for the last time; the entry moved to the failed queue.
    #[error("push of {key} gave up: {message}")]
    TerminalPush {
        /// Record that failed to push.
        key: RecordKey,
        /// Underlying failure.
        message: String,
    },

    /// A pulled change could not be applied locally.
    #[error("could not apply remote change to {key}: {message}")]
    PullApply {
        /// Record the change was for.
        key: RecordKey,
        /// Underlying failure.
        message: String,
    },

    /// The cycle stopped early without advancing the last sync time.
    #[error("sync cycle aborted: {0}")]
    CycleAbort(String),

    /// A resolution policy returned an unusable answer.
    #[error("conflict policy violation for {key}: {message}")]
    ConflictPolicyViolation {
        /// Record being resolved.
        key: RecordKey,
        /// What was wrong with the answer.
        message: String,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A cycle is already running.
    #[error("a sync cycle is already running")]
    AlreadyRunning,

    /// No conflict with this id.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// The conflict was already resolved.
    #[error("conflict already resolved: {0}")]
    ConflictAlreadyResolved(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::TransientPush { .. } => true,
            SyncError::NotConnected => true,
            SyncError::AlreadyRunning => true,
            SyncError::CycleAbort(_) => true,
            _ => false,
        }
    }

    /// Returns true if the error reports a no-op rather than a failure.
    ///
    /// Committing an already resolved conflict twice, or requesting a cycle
    /// while one runs, leaves the system in the intended state.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SyncError::ConflictAlreadyResolved(_) | SyncError::AlreadyRunning
        )
    }
}
