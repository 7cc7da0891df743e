//! Conflict listing and resolution commands.

use super::{emit, format_millis, parse_body, CliStore, Format};
use mendsync_engine::ResolutionSurface;
use mendsync_protocol::{ConflictRecord, Payload};
use mendsync_store::LocalStore;
use std::sync::Arc;

/// The payload an operator picked for a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Keep the local side.
    KeepLocal,
    /// Take the server side.
    AcceptServer,
    /// Use a hand-edited JSON body.
    Data(String),
}

/// Lists conflicts, pending only unless `all` is set.
pub fn list(store: &CliStore, all: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let conflicts = if all {
        store.list_conflicts()?
    } else {
        store.list_pending_conflicts()?
    };
    emit(&conflicts, format, |conflicts| print_conflicts(conflicts))
}

/// Commits a decision for a conflict.
pub fn run(
    store: CliStore,
    conflict_id: &str,
    choice: Choice,
) -> Result<(), Box<dyn std::error::Error>> {
    let surface = ResolutionSurface::new(Arc::new(store));
    let outcome = match choice {
        Choice::KeepLocal => surface.keep_local(conflict_id),
        Choice::AcceptServer => surface.accept_server(conflict_id),
        Choice::Data(data) => surface.commit(conflict_id, Payload::data(parse_body(&data)?)),
    };

    match outcome {
        Ok(record) => {
            println!(
                "Resolved {} for {} (version {}, queued for push)",
                conflict_id, record.key, record.version
            );
            Ok(())
        }
        Err(err) if err.is_benign() => {
            println!("Conflict {conflict_id} was already resolved");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_conflicts(conflicts: &[ConflictRecord]) {
    if conflicts.is_empty() {
        println!("No conflicts");
        return;
    }
    for conflict in conflicts {
        println!("{} {} [{}]", conflict.conflict_id, conflict.key, conflict.status);
        println!("  Detected: {}", format_millis(conflict.timestamp));
        println!("  Local:    {}", describe(&conflict.local_data));
        println!(
            "  Server:   {} (at {})",
            describe(&conflict.server_data),
            format_millis(conflict.server_timestamp)
        );
        if let Some(resolved) = &conflict.resolved_data {
            println!("  Resolved: {}", describe(resolved));
        }
    }
}

fn describe(payload: &Payload) -> String {
    match payload {
        Payload::Tombstone => "<deleted>".to_string(),
        Payload::Data(value) => value.to_string(),
    }
}
