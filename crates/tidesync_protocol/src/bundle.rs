//! Full-state export bundles.
//!
//! ## Checksum
//!
//! The checksum is the lower-case hex SHA-256 of the JSON encoding of
//! `items`. Items are sorted by `(entity_type, entity_id)` when a bundle is
//! sealed, so the same backend state always yields the same checksum.
//! Importers must call [`ExportBundle::verify`] before applying anything.

use crate::error::{ProtocolError, ProtocolResult};
use crate::item::SyncItem;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Current bundle format version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Descriptive bundle metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// Number of items.
    pub item_count: u64,
    /// Distinct entity types, sorted.
    pub entity_types: Vec<String>,
    /// Free-form origin label (account, device, server name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A checksummed snapshot of every item held by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBundle {
    /// Bundle format version.
    pub version: u32,
    /// Export time (Unix millis).
    pub exported_at: u64,
    /// Hex SHA-256 over the items.
    pub checksum: String,
    /// Items sorted by `(entity_type, entity_id)`.
    pub items: Vec<SyncItem>,
    /// Metadata.
    pub metadata: BundleMetadata,
}

impl ExportBundle {
    /// Builds a bundle, sorting the items and computing checksum and metadata.
    pub fn seal(
        mut items: Vec<SyncItem>,
        exported_at: u64,
        source: Option<String>,
    ) -> ProtocolResult<Self> {
        items.sort_by(|a, b| a.key().cmp(&b.key()));

        let entity_types: BTreeSet<&str> = items.iter().map(|i| i.entity_type.as_str()).collect();
        let metadata = BundleMetadata {
            item_count: items.len() as u64,
            entity_types: entity_types.into_iter().map(str::to_string).collect(),
            source,
        };

        let checksum = compute_checksum(&items)?;

        Ok(Self {
            version: BUNDLE_FORMAT_VERSION,
            exported_at,
            checksum,
            items,
            metadata,
        })
    }

    /// Verifies format version and checksum.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnsupportedBundleVersion`] for unknown formats
    /// - [`ProtocolError::ChecksumMismatch`] if the items were altered
    pub fn verify(&self) -> ProtocolResult<()> {
        if self.version != BUNDLE_FORMAT_VERSION {
            return Err(ProtocolError::UnsupportedBundleVersion(self.version));
        }

        let actual = compute_checksum(&self.items)?;
        if actual != self.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Returns the items of one entity type.
    pub fn items_of<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a SyncItem> + 'a {
        self.items
            .iter()
            .filter(move |item| item.entity_type == entity_type)
    }

    /// Serialises the bundle as pretty JSON.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parses a bundle from JSON. Does not verify the checksum.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

fn compute_checksum(items: &[SyncItem]) -> ProtocolResult<String> {
    let encoded = serde_json::to_vec(items).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

/// How an import treats items already present in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportMode {
    /// Keep existing items whose version is at least the incoming version.
    #[default]
    Merge,
    /// Drop the target's contents first.
    Replace,
}

/// Import tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Merge or replace.
    pub mode: ImportMode,
    /// Validate only; apply nothing.
    pub dry_run: bool,
}

impl ImportOptions {
    /// Options for a replacing import.
    pub fn replace() -> Self {
        Self {
            mode: ImportMode::Replace,
            dry_run: false,
        }
    }

    /// Sets dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Items written.
    pub imported: u64,
    /// Items left alone because the target already held a newer version.
    pub skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{EncryptedSyncData, IV_SIZE, TAG_SIZE};

    fn item(entity_type: &str, entity_id: &str, version: u64) -> SyncItem {
        SyncItem {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            data: EncryptedSyncData::new([version as u8; IV_SIZE], [0u8; TAG_SIZE], vec![7; 4]),
            version,
            timestamp: version * 10,
            modified_at: version * 10,
            deleted: false,
        }
    }

    #[test]
    fn seal_sorts_and_describes() {
        let bundle = ExportBundle::seal(
            vec![item("task", "b", 1), item("goal", "z", 2), item("task", "a", 3)],
            1234,
            Some("device-1".into()),
        )
        .unwrap();

        let keys: Vec<_> = bundle.items.iter().map(|i| i.key()).collect();
        assert_eq!(keys, vec![("goal", "z"), ("task", "a"), ("task", "b")]);
        assert_eq!(bundle.metadata.item_count, 3);
        assert_eq!(bundle.metadata.entity_types, vec!["goal", "task"]);
        assert_eq!(bundle.version, BUNDLE_FORMAT_VERSION);
        assert_eq!(bundle.checksum.len(), 64);
        assert_eq!(bundle.items_of("task").count(), 2);
        bundle.verify().unwrap();
    }

    #[test]
    fn checksum_independent_of_input_order() {
        let a = ExportBundle::seal(vec![item("goal", "1", 1), item("goal", "2", 1)], 1, None).unwrap();
        let b = ExportBundle::seal(vec![item("goal", "2", 1), item("goal", "1", 1)], 2, None).unwrap();
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn tampered_item_fails_verification() {
        let mut bundle = ExportBundle::seal(vec![item("goal", "1", 1)], 1, None).unwrap();
        bundle.items[0].version = 99;
        assert!(matches!(
            bundle.verify(),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn unknown_format_rejected() {
        let mut bundle = ExportBundle::seal(vec![], 1, None).unwrap();
        bundle.version = 42;
        assert!(matches!(
            bundle.verify(),
            Err(ProtocolError::UnsupportedBundleVersion(42))
        ));
    }

    #[test]
    fn json_roundtrip_keeps_checksum_valid() {
        let bundle = ExportBundle::seal(vec![item("reminder", "r", 4)], 9, None).unwrap();
        let json = bundle.to_json().unwrap();
        let back = ExportBundle::from_json(&json).unwrap();
        assert_eq!(back, bundle);
        back.verify().unwrap();
    }

    #[test]
    fn import_options_builders() {
        let options = ImportOptions::replace().with_dry_run(true);
        assert_eq!(options.mode, ImportMode::Replace);
        assert!(options.dry_run);
        assert_eq!(ImportOptions::default().mode, ImportMode::Merge);
    }
}
