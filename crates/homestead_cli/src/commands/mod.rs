//! CLI command implementations.

pub mod conflicts;
pub mod integrations;
pub mod outbox;
pub mod serve;
pub mod sync;

use clap::ValueEnum;
use homestead_store::{FileRecordStore, StoreHandle};
use std::path::Path;
use std::sync::Arc;

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the durable store at `path`, creating it if needed.
pub fn open_store(path: &Path) -> Result<StoreHandle, Box<dyn std::error::Error>> {
    let store = FileRecordStore::open(path, true)?;
    Ok(StoreHandle::new(Arc::new(store)))
}

/// Parses a `key=value` argument.
pub fn parse_setting(arg: &str) -> Result<(String, String), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{arg}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{arg}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Formats Unix millis for display.
pub fn format_millis(millis: Option<i64>) -> String {
    millis.map_or_else(|| "-".to_string(), |m| m.to_string())
}

/// Encodes bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes lowercase or uppercase hex.
pub fn from_hex(text: &str) -> Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err("hex string has odd length".into());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex at offset {i}"))
        })
        .collect()
}
