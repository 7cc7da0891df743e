//! CLI command implementations.

pub mod compact;
pub mod queue;
pub mod records;
pub mod resolve;
pub mod status;

use clap::ValueEnum;
use mendsync_protocol::SystemClock;
use mendsync_store::{FileJournal, Store, StoreConfig};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// The store type every command works on.
pub type CliStore = Store<FileJournal>;

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the store at `path`.
///
/// Fails if no journal exists there, so a typo does not create an empty store.
pub fn open_store(path: &Path) -> Result<CliStore, Box<dyn std::error::Error>> {
    if !path.join("journal.log").exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    Ok(Store::open_dir(path, Arc::new(SystemClock), StoreConfig::default())?)
}

/// Prints `value` as JSON, or falls back to `text` for the text format.
pub fn emit<T: Serialize>(
    value: &T,
    format: Format,
    text: impl FnOnce(&T),
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => text(value),
    }
    Ok(())
}

/// Parses a JSON body given on the command line.
pub fn parse_body(data: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    serde_json::from_str(data).map_err(|e| format!("Invalid JSON body: {e}").into())
}

/// Formats a millisecond timestamp for text output.
pub fn format_millis(ms: i64) -> String {
    let secs = ms.div_euclid(1000);
    let millis = ms.rem_euclid(1000);
    format!("{secs}.{millis:03}s")
}

#[cfg(test)]
pub(crate) fn test_store() -> (tempfile::TempDir, CliStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_dir(dir.path(), Arc::new(SystemClock), StoreConfig::default()).unwrap();
    (dir, store)
}
