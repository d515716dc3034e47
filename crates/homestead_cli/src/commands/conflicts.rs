//! Conflict commands.

use super::{format_millis, Format};
use homestead_store::StoreHandle;
use homestead_sync_engine::{ConflictResolver, ConflictStore};
use homestead_sync_protocol::{ConflictLog, Record, Resolution};

/// Runs `conflicts list`.
pub fn list(
    handle: &StoreHandle,
    all: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = ConflictStore::new(handle.clone());
    let conflicts = if all {
        store.list_all()?
    } else {
        store.list_unresolved()?
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&conflicts)?),
        Format::Text => {
            if conflicts.is_empty() {
                println!("No conflicts");
                return Ok(());
            }
            for conflict in &conflicts {
                print_conflict(conflict)?;
            }
            println!("{} conflict(s)", conflicts.len());
        }
    }
    Ok(())
}

fn print_conflict(conflict: &ConflictLog) -> Result<(), Box<dyn std::error::Error>> {
    println!("Conflict {}", conflict.id);
    println!("  Record:    {}/{}", conflict.store_name, conflict.record_id);
    println!("  Detected:  {}", conflict.detected_at);
    match conflict.resolution {
        Some(resolution) => println!(
            "  Resolved:  {} at {}",
            resolution.as_str(),
            format_millis(conflict.resolved_at)
        ),
        None => println!("  Resolved:  no"),
    }
    println!("  Local:     {}", describe(conflict.local_version.as_ref())?);
    println!("  Remote:    {}", describe(conflict.remote_version.as_ref())?);
    println!();
    Ok(())
}

fn describe(version: Option<&Record>) -> Result<String, serde_json::Error> {
    match version {
        Some(record) => serde_json::to_string(record),
        None => Ok("(deleted)".to_string()),
    }
}

/// Runs `conflicts resolve`.
pub fn resolve(
    handle: &StoreHandle,
    conflict: &str,
    resolution: Resolution,
) -> Result<(), Box<dyn std::error::Error>> {
    let log = ConflictResolver::new(handle.clone()).resolve_conflict(conflict, resolution)?;
    println!(
        "Resolved {}/{} with {}",
        log.store_name,
        log.record_id,
        resolution.as_str()
    );
    if resolution == Resolution::LocalWins {
        println!("The local version will be pushed on the next sync");
    }
    Ok(())
}
