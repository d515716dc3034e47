//! Outbox commands.

use super::{format_millis, Format};
use homestead_store::StoreHandle;
use homestead_sync_engine::Outbox;
use homestead_sync_protocol::{QueueStatus, SyncQueueItem};

/// Returns outbox items, optionally filtered by status.
pub fn items(
    handle: &StoreHandle,
    status: Option<QueueStatus>,
) -> Result<Vec<SyncQueueItem>, Box<dyn std::error::Error>> {
    let outbox = Outbox::new(handle.clone());
    let items = match status {
        Some(status) => outbox.list_by_status(status)?,
        None => outbox.list()?,
    };
    Ok(items)
}

/// Runs `outbox list`.
pub fn list(
    handle: &StoreHandle,
    status: Option<QueueStatus>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let items = items(handle, status)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        Format::Text => {
            if items.is_empty() {
                println!("Outbox is empty");
                return Ok(());
            }
            println!(
                "{:<36}  {:<16}  {:<24}  {:<6}  {:<10}  {:>8}  {:<14}",
                "ID", "STORE", "RECORD", "OP", "STATUS", "ATTEMPTS", "NEXT ATTEMPT"
            );
            for item in &items {
                println!(
                    "{:<36}  {:<16}  {:<24}  {:<6}  {:<10}  {:>8}  {:<14}",
                    item.id,
                    item.store_name,
                    item.payload_ref,
                    item.operation.as_str(),
                    item.status.as_str(),
                    item.attempts,
                    format_millis(item.next_attempt_at),
                );
                if let Some(error) = &item.error {
                    println!("    error: {error}");
                }
            }
            println!();
            println!("{} item(s)", items.len());
        }
    }
    Ok(())
}

/// Runs `outbox retry-failed`.
pub fn retry_failed(handle: &StoreHandle) -> Result<(), Box<dyn std::error::Error>> {
    let count = Outbox::new(handle.clone()).retry_failed()?;
    println!("Moved {count} failed item(s) back to pending");
    Ok(())
}

/// Runs `outbox clear`.
pub fn clear(handle: &StoreHandle, item: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Outbox::new(handle.clone()).clear_item(item)? {
        return Err(format!("No outbox item {item}").into());
    }
    println!("Cleared outbox item {item}");
    Ok(())
}

/// Runs `outbox compact`.
pub fn compact(handle: &StoreHandle) -> Result<(), Box<dyn std::error::Error>> {
    let count = Outbox::new(handle.clone()).compact()?;
    println!("Removed {count} acknowledged item(s)");
    Ok(())
}
