//! # MendSync Store
//!
//! Durable local storage for MendSync clients.
//!
//! This crate provides:
//! - The [`LocalStore`] trait the sync engine runs against
//! - [`Store`], a journal-backed implementation
//! - [`Journal`] backends: [`FileJournal`] for disk, [`MemoryJournal`] for tests
//!
//! ## Durability
//!
//! Each logical write (a local edit, a push acknowledgement, a conflict
//! resolution) is one CBOR-encoded batch of operations inside one
//! checksummed journal frame. A write is visible to readers only after its
//! frame was appended, so a crash never exposes half an operation. On open
//! the journal is replayed; a torn final frame is cut off.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mendsync_protocol::SystemClock;
//! use mendsync_store::{LocalStore, Store, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = Store::open_dir("./notes.db", Arc::new(SystemClock), StoreConfig::default())?;
//! store.put("note", "p1", serde_json::json!({"title": "draft"}).into())?;
//! # Ok::<(), mendsync_store::StoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod journal;
mod local_store;
mod ops;
mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use journal::{
    compute_crc32, decode_frames, encode_frame, DecodedFrames, FileJournal, Journal,
    MemoryJournal, FRAME_MAGIC,
};
pub use local_store::LocalStore;
pub use store::Store;
