//! Single record commands.

use super::{emit, format_millis, parse_body, CliStore, Format};
use mendsync_protocol::{LocalRecord, Payload};
use mendsync_store::LocalStore;

/// Shows one record.
pub fn show(
    store: &CliStore,
    record_type: &str,
    id: &str,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = store
        .get(record_type, id)?
        .ok_or_else(|| format!("Record {record_type}/{id} not found"))?;
    emit(&record, format, print_record)
}

/// Writes a record as a local edit, queueing it for the next push.
pub fn put(
    store: &CliStore,
    record_type: &str,
    id: &str,
    data: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = parse_body(data)?;
    let record = store.put(record_type, id, Payload::data(body))?;
    println!("Wrote {} (version {}, {})", record.key, record.version, record.sync_status);
    Ok(())
}

/// Deletes a record with a tombstone.
pub fn delete(
    store: &CliStore,
    record_type: &str,
    id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = store.delete(record_type, id)?;
    println!("Deleted {} (version {})", record.key, record.version);
    Ok(())
}

fn print_record(record: &LocalRecord) {
    println!("Record:    {}", record.key);
    println!("Version:   {}", record.version);
    println!("Status:    {}", record.sync_status);
    println!("Timestamp: {}", format_millis(record.local_timestamp));
    match &record.payload {
        Payload::Tombstone => println!("Payload:   <deleted>"),
        Payload::Data(value) => {
            println!("Payload:");
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            for line in pretty.lines() {
                println!("  {line}");
            }
        }
    }
}
