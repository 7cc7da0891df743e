//! # MendSync Engine
//!
//! Offline-first synchronization between a local store and a remote service.
//!
//! This crate provides:
//! - [`SyncManager`]: one push-then-pull cycle at a time
//! - [`RemoteChangeFeed`] with [`MemoryFeed`] and [`HttpChangeFeed`]
//! - [`ResolutionSurface`] for conflicts that need a person to decide
//! - [`SyncScheduler`] turning timer ticks and trigger requests into cycles
//!
//! ## Architecture
//!
//! The local store is the source of truth for the application. Every local
//! write is queued; a cycle pushes the queue, then pulls remote changes and
//! reconciles them through the conflict policy:
//!
//! 1. Critical record types always take the server's version
//! 2. Otherwise the newer timestamp wins
//! 3. Ties are merged, or handed to the resolution surface
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time
//! - No local edit is silently dropped: it is synced, failed, or in conflict
//! - A push is retried at most `max_retries` times before it is parked
//! - The last sync time only advances when the whole pull was applied

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod feed;
mod http;
mod manager;
mod resolution;
mod scheduler;

pub use config::{RetryConfig, SyncConfig, DEFAULT_SYNC_INTERVAL};
pub use error::{SyncError, SyncResult};
pub use feed::{MemoryFeed, RemoteChangeFeed};
pub use http::{ChangesResponse, HttpChangeFeed, HttpClient, HttpResponse, LoopbackClient};
pub use manager::{CycleReport, SyncManager, SyncState, SyncStats};
pub use resolution::ResolutionSurface;
pub use scheduler::{SchedulerStats, SyncScheduler, Trigger, TriggerHandle, WakeSource};
