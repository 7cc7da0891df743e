//! # MendSync Protocol
//!
//! Record model and conflict resolution policy for MendSync.
//!
//! This crate provides:
//! - `LocalRecord`, `RecordKey` and `Payload` for client-side records
//! - `SyncQueueEntry` / `FailedQueueEntry` for the outbound queues
//! - `ConflictRecord` for divergences awaiting a manual decision
//! - `ServerChangeEvent` for changes reported by the remote feed
//! - `ConflictPolicy` for deterministic conflict resolution
//!
//! This is a pure data crate with no I/O. The only time source is the
//! [`Clock`] trait, so callers decide where wall-clock reads happen.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod clock;
mod conflict;
mod policy;
mod queue;
mod record;

pub use change::{ServerChangeEvent, StatusSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{ConflictRecord, ConflictStatus};
pub use policy::{
    ConflictPolicy, CriticalTypes, Merger, Resolution, ResolutionPolicy, ShallowMerge, Strategy,
    MERGED_AT_FIELD,
};
pub use queue::{FailedQueueEntry, SyncQueueEntry};
pub use record::{LocalRecord, Payload, RecordKey, SyncStatus};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of failed push attempts after which an entry moves to the failed queue.
pub const MAX_RETRIES: u32 = 3;
