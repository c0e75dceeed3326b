use std::path::Path;

use anyhow::Context;

use crate::memory_store::SheetSnapshot;
use crate::models::RecordSet;

/// Reads the three record collections from an exported JSON file.
pub fn load_records(path: &Path) -> anyhow::Result<RecordSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read records from {}", path.display()))?;
    parse_records(&raw).with_context(|| format!("invalid records file {}", path.display()))
}

pub fn parse_records(raw: &str) -> anyhow::Result<RecordSet> {
    Ok(serde_json::from_str(raw)?)
}

/// Reads the template document's sheets for the local store.
pub fn load_template_sheets(path: &Path) -> anyhow::Result<Vec<SheetSnapshot>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid template file {}", path.display()))
}
