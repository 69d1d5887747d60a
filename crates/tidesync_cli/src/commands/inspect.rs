//! Inspect command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tidesync_protocol::ExportBundle;

/// Bundle inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Bundle path.
    pub path: String,
    /// Bundle format version.
    pub format_version: u32,
    /// Export time (Unix millis).
    pub exported_at: u64,
    /// Device or store that produced the bundle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Number of items.
    pub item_count: usize,
    /// Total ciphertext size in bytes.
    pub payload_bytes: u64,
    /// Whether the checksum matches the items.
    pub checksum_valid: bool,
    /// Per entity type statistics.
    pub entity_types: Vec<EntityTypeStats>,
}

/// Statistics for a single entity type.
#[derive(Debug, Default, Serialize)]
pub struct EntityTypeStats {
    /// Entity type.
    pub entity_type: String,
    /// Number of live entities.
    pub live: usize,
    /// Number of tombstones.
    pub tombstones: usize,
    /// Highest version in the bundle.
    pub max_version: u64,
    /// Latest commit timestamp (Unix millis).
    pub last_timestamp: u64,
}

/// Summarises a bundle without checking its checksum first.
pub fn inspect(path: &Path, bundle: &ExportBundle) -> InspectResult {
    let mut by_type: BTreeMap<&str, EntityTypeStats> = BTreeMap::new();
    let mut payload_bytes = 0u64;

    for item in &bundle.items {
        payload_bytes += item.data.stored_size();
        let stats = by_type
            .entry(item.entity_type.as_str())
            .or_insert_with(|| EntityTypeStats {
                entity_type: item.entity_type.clone(),
                ..EntityTypeStats::default()
            });
        if item.deleted {
            stats.tombstones += 1;
        } else {
            stats.live += 1;
        }
        stats.max_version = stats.max_version.max(item.version);
        stats.last_timestamp = stats.last_timestamp.max(item.timestamp);
    }

    InspectResult {
        path: path.display().to_string(),
        format_version: bundle.version,
        exported_at: bundle.exported_at,
        source: bundle.metadata.source.clone(),
        item_count: bundle.items.len(),
        payload_bytes,
        checksum_valid: bundle.verify().is_ok(),
        entity_types: by_type.into_values().collect(),
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read bundle {:?}: {}", path, e))?;
    let bundle = ExportBundle::from_json(&json)?;
    let result = inspect(path, &bundle);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text(&result),
        other => return Err(format!("Unknown format '{}' (expected text or json)", other).into()),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Bundle: {}", result.path);
    println!("  Format version: {}", result.format_version);
    println!("  Exported at:    {}", result.exported_at);
    if let Some(source) = &result.source {
        println!("  Source:         {}", source);
    }
    println!("  Items:          {}", result.item_count);
    println!("  Payload bytes:  {}", result.payload_bytes);
    println!(
        "  Checksum:       {}",
        if result.checksum_valid { "valid" } else { "MISMATCH" }
    );

    if !result.entity_types.is_empty() {
        println!();
        println!(
            "  {:<20} {:>8} {:>10} {:>12}",
            "Entity type", "Live", "Deleted", "Max version"
        );
        for stats in &result.entity_types {
            println!(
                "  {:<20} {:>8} {:>10} {:>12}",
                stats.entity_type, stats.live, stats.tombstones, stats.max_version
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_protocol::{EncryptedSyncData, SyncItem, IV_SIZE, TAG_SIZE};

    fn item(entity_type: &str, entity_id: &str, version: u64, deleted: bool) -> SyncItem {
        SyncItem {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            data: EncryptedSyncData::new([0; IV_SIZE], [0; TAG_SIZE], vec![1, 2, 3, 4]),
            version,
            timestamp: version * 10,
            modified_at: version * 10,
            deleted,
        }
    }

    #[test]
    fn counts_per_entity_type() {
        let bundle = ExportBundle::seal(
            vec![
                item("goal", "g1", 2, false),
                item("goal", "g2", 1, true),
                item("task", "t1", 5, false),
            ],
            1_000,
            Some("phone".into()),
        )
        .unwrap();

        let result = inspect(Path::new("bundle.json"), &bundle);
        assert_eq!(result.item_count, 3);
        assert!(result.checksum_valid);
        assert_eq!(result.source.as_deref(), Some("phone"));
        assert_eq!(result.entity_types.len(), 2);

        let goal = &result.entity_types[0];
        assert_eq!(goal.entity_type, "goal");
        assert_eq!((goal.live, goal.tombstones, goal.max_version), (1, 1, 2));
        assert_eq!(result.entity_types[1].last_timestamp, 50);
    }

    #[test]
    fn reports_tampering() {
        let mut bundle = ExportBundle::seal(vec![item("goal", "g1", 1, false)], 1_000, None).unwrap();
        bundle.items[0].deleted = true;
        assert!(!inspect(Path::new("b.json"), &bundle).checksum_valid);
    }
}
