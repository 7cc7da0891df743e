//! Error types for store operations.

use mendsync_protocol::RecordKey;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal is corrupted.
    #[error("journal corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch in a journal frame.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The storage layer refused the write.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// No record with this key.
    #[error("record not found: {0}")]
    RecordNotFound(RecordKey),

    /// No queue entry with this sequence number.
    #[error("queue entry not found: {0}")]
    EntryNotFound(u64),

    /// No conflict with this id.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// The conflict was already resolved.
    #[error("conflict already resolved: {0}")]
    ConflictAlreadyResolved(String),
}

impl StoreError {
    /// Creates a codec error from any displayable error.
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }

    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
