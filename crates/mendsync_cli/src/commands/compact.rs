//! Compact command implementation.

use super::CliStore;
use std::path::Path;

/// Rewrites the journal as a single snapshot frame.
pub fn run(store: &CliStore, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {:?}", path);

    let before = store.journal_size()?;
    store.compact()?;
    let after = store.journal_size()?;

    println!("  Size before: {} bytes", before);
    println!("  Size after:  {} bytes", after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        before.saturating_sub(after),
        if before > 0 {
            (before.saturating_sub(after) as f64 / before as f64) * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{open_store, test_store};
    use mendsync_protocol::Payload;
    use mendsync_store::LocalStore;
    use serde_json::json;

    #[test]
    fn compaction_shrinks_rewritten_journal() {
        let (dir, store) = test_store();
        for i in 0..20 {
            store.put("notes", "a", json!({"n": i}).into()).unwrap();
        }
        let before = store.journal_size().unwrap();

        run(&store, dir.path()).unwrap();
        assert!(store.journal_size().unwrap() < before);
        drop(store);

        let store = open_store(dir.path()).unwrap();
        let record = store.get("notes", "a").unwrap().unwrap();
        assert_eq!(record.payload, Payload::data(json!({"n": 19})));
        assert_eq!(record.version, 20);
    }
}
