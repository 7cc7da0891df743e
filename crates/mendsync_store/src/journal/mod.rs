//! Append-only journal backends.
//!
//! A journal is an opaque byte log. The store appends one framed batch of
//! operations per logical write and replays the frames on open; journals do
//! not interpret the frames they hold.
//!
//! # Invariants
//!
//! - `append` either persists the whole frame or fails
//! - `read_all` returns every byte previously appended
//! - `replace` swaps the whole contents atomically
//! - Backends must be `Send` so the store can share them behind a lock

mod file;
mod frame;
mod memory;

pub use file::FileJournal;
pub use frame::{compute_crc32, decode_frames, encode_frame, DecodedFrames, FRAME_MAGIC};
pub use memory::MemoryJournal;

use crate::error::StoreResult;

/// A byte log backing a store.
pub trait Journal: Send {
    /// Reads the entire journal.
    fn read_all(&mut self) -> StoreResult<Vec<u8>>;

    /// Appends a frame to the end of the journal.
    fn append(&mut self, frame: &[u8]) -> StoreResult<()>;

    /// Ensures appended data is durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Drops everything after `len` bytes. Used to cut a torn tail.
    fn truncate(&mut self, len: u64) -> StoreResult<()>;

    /// Atomically replaces the journal contents. Used by compaction.
    fn replace(&mut self, contents: &[u8]) -> StoreResult<()>;

    /// Returns the journal size in bytes.
    fn size(&self) -> StoreResult<u64>;
}
