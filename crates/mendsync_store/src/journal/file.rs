//! File-backed journal.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! └─ journal.log       # Framed store operations
//! ```

use crate::error::{StoreError, StoreResult};
use crate::journal::Journal;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const JOURNAL_TEMP: &str = "journal.log.tmp";

/// A journal stored in a directory on disk.
///
/// Holds an exclusive advisory lock on the directory for its lifetime, so
/// only one process can write to a store at a time.
///
/// # Durability
///
/// - `sync()` calls `File::sync_all()`
/// - `replace()` writes a temp file, syncs it and renames it over the journal
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    file: File,
    size: u64,
    _lock_file: File,
}

impl FileJournal {
    /// Opens or creates a journal directory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process holds the directory,
    /// or an I/O error if the directory or files cannot be created.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        let file = Self::open_journal(&dir.join(JOURNAL_FILE))?;
        let size = file.metadata()?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            size,
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    fn open_journal(path: &Path) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn sync_directory(&self) -> StoreResult<()> {
        #[cfg(unix)]
        {
            File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }
}

impl Journal for FileJournal {
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size as usize);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn append(&mut self, frame: &[u8]) -> StoreResult<()> {
        if frame.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::End(0))?;
        if let Err(err) = self.file.write_all(frame).and_then(|()| self.file.flush()) {
            // A short write leaves part of the frame behind; cut it.
            if let Err(reset) = self.file.set_len(self.size) {
                tracing::error!(error = %reset, size = self.size, "could not cut partial frame");
            }
            return Err(err.into());
        }
        self.size += frame.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        if len > self.size {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    len, self.size
                ),
            )));
        }
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StoreResult<()> {
        let temp_path = self.dir.join(JOURNAL_TEMP);
        let mut temp = File::create(&temp_path)?;
        temp.write_all(contents)?;
        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, self.journal_path())?;
        self.sync_directory()?;

        self.file = Self::open_journal(&self.journal_path())?;
        self.size = contents.len() as u64;
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.size)
    }
}
