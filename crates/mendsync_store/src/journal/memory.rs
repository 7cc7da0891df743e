//! In-memory journal for testing.

use crate::error::{StoreError, StoreResult};
use crate::journal::Journal;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory journal.
///
/// Clones share the same bytes, so a test can keep a handle, drop the store,
/// and reopen a new store over the surviving contents. Writes can be made to
/// fail on demand to simulate an unavailable storage layer.
///
/// # Example
///
/// ```rust
/// use mendsync_store::{Journal, MemoryJournal};
///
/// let mut journal = MemoryJournal::new();
/// journal.append(b"frame").unwrap();
/// assert_eq!(journal.size().unwrap(), 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<RwLock<Vec<u8>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryJournal {
    /// Creates a new empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal holding pre-existing bytes.
    ///
    /// Useful for testing recovery.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the journal bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory journal write refused".into()));
        }
        Ok(())
    }
}

impl Journal for MemoryJournal {
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, frame: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        self.data.write().extend_from_slice(frame);
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.check_writable()
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        self.check_writable()?;
        self.data.write().truncate(len as usize);
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        *self.data.write() = contents.to_vec();
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}
