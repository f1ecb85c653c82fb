//! Loading batch files from disk.

use crate::model::BatchItem;
use anyhow::{Context, Result};
use std::path::Path;

/// Read a batch of items from a JSON array or a YAML list.
/// Format is auto-detected from file extension, falling back to YAML.
pub fn read_batch_file(path: &Path) -> Result<Vec<BatchItem>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file '{}'", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let items: Vec<BatchItem> = match ext {
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("Invalid JSON batch file '{}'", path.display()))?,
        _ => serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid YAML batch file '{}'", path.display()))?,
    };

    tracing::debug!("Read {} items from {}", items.len(), path.display());
    Ok(items)
}
