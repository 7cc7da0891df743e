//! Pending and failed queue commands.

use super::{emit, format_millis, CliStore, Format};
use mendsync_engine::ResolutionSurface;
use mendsync_protocol::{FailedQueueEntry, SyncQueueEntry};
use mendsync_store::LocalStore;
use std::sync::Arc;

/// Lists the pending queue.
pub fn pending(store: &CliStore, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let entries = store.list_pending_sync()?;
    emit(&entries, format, |entries| print_pending(entries))
}

/// Lists the failed queue.
pub fn failed(store: &CliStore, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let entries = store.list_failed()?;
    emit(&entries, format, |entries| print_failed(entries))
}

/// Moves a failed entry back to the pending queue.
pub fn resubmit(store: CliStore, seq: u64) -> Result<(), Box<dyn std::error::Error>> {
    let surface = ResolutionSurface::new(Arc::new(store));
    let entry = surface.resubmit_failed(seq)?;
    println!(
        "Resubmitted {} as pending entry #{} (was #{})",
        entry.key, entry.seq, seq
    );
    Ok(())
}

fn print_pending(entries: &[SyncQueueEntry]) {
    if entries.is_empty() {
        println!("No pending entries");
        return;
    }
    println!("{:>6}  {:<32}  {:>7}  {}", "SEQ", "RECORD", "RETRIES", "ENQUEUED");
    for entry in entries {
        let held = entry
            .not_before
            .map(|t| format!("  (not before {})", format_millis(t)))
            .unwrap_or_default();
        println!(
            "{:>6}  {:<32}  {:>7}  {}{}",
            entry.seq,
            entry.key.to_string(),
            entry.retry_count,
            format_millis(entry.enqueued_at),
            held
        );
    }
}

fn print_failed(entries: &[FailedQueueEntry]) {
    if entries.is_empty() {
        println!("No failed entries");
        return;
    }
    for entry in entries {
        println!("#{} {}", entry.seq, entry.key);
        println!("  Retries: {}", entry.retry_count);
        println!("  Failed:  {}", format_millis(entry.failed_at));
        println!("  Reason:  {}", entry.reason);
    }
}
