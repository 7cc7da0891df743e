//! Status command implementation.

use super::{emit, format_millis, CliStore, Format};
use mendsync_store::LocalStore;
use serde::Serialize;
use std::path::Path;

/// Store status report.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Records held locally.
    pub record_count: usize,
    /// Records that are tombstones.
    pub tombstone_count: usize,
    /// Start of the last complete sync cycle (ms).
    pub last_sync_time: Option<i64>,
    /// Entries waiting to be pushed.
    pub pending_count: usize,
    /// Entries that exhausted their retries.
    pub failed_count: usize,
    /// Conflicts awaiting a decision.
    pub conflict_count: usize,
}

/// Builds the status report.
pub fn collect(store: &CliStore, path: &Path) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let summary = store.summary()?;
    let records = store.records()?;
    Ok(StatusReport {
        path: path.display().to_string(),
        journal_size: store.journal_size()?,
        record_count: records.len(),
        tombstone_count: records.iter().filter(|r| r.payload.is_tombstone()).count(),
        last_sync_time: summary.last_sync_time,
        pending_count: summary.pending_count,
        failed_count: summary.failed_count,
        conflict_count: summary.conflict_count,
    })
}

/// Runs the status command.
pub fn run(
    store: &CliStore,
    path: &Path,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(store, path)?;
    emit(&report, format, print_text_output)
}

fn print_text_output(report: &StatusReport) {
    println!("MendSync Store Status");
    println!("=====================");
    println!();
    println!("Path:         {}", report.path);
    println!("Journal size: {} bytes", report.journal_size);
    println!();
    println!("Records:");
    println!("  Total:      {}", report.record_count);
    println!("  Tombstones: {}", report.tombstone_count);
    println!();
    println!("Sync:");
    match report.last_sync_time {
        Some(ms) => println!("  Last sync:  {}", format_millis(ms)),
        None => println!("  Last sync:  never"),
    }
    println!("  Pending:    {}", report.pending_count);
    println!("  Failed:     {}", report.failed_count);
    println!("  Conflicts:  {}", report.conflict_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_store;
    use serde_json::json;

    #[test]
    fn counts_records_and_queues() {
        let (dir, store) = test_store();
        store.put("notes", "a", json!({"x": 1}).into()).unwrap();
        store.put("notes", "b", json!({"x": 2}).into()).unwrap();
        store.delete("notes", "b").unwrap();

        let report = collect(&store, dir.path()).unwrap();
        assert_eq!(report.record_count, 2);
        assert_eq!(report.tombstone_count, 1);
        assert_eq!(report.pending_count, 2);
        assert_eq!(report.last_sync_time, None);
        assert!(report.journal_size > 0);
    }
}
