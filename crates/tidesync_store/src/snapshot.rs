//! Snapshot files.
//!
//! A snapshot is an [`ExportBundle`] written as JSON. Saving writes to a
//! sibling temporary file and renames it into place, so a crash leaves
//! either the old or the new snapshot. Loading verifies the checksum before
//! building the store.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::versioned::VersionedStore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tidesync_protocol::{ExportBundle, ImportOptions};
use tracing::debug;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes a bundle to `path` atomically.
///
/// # Errors
///
/// Returns an error if encoding or any file operation fails.
pub fn write_bundle(path: &Path, bundle: &ExportBundle) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = bundle.to_json()?;
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), items = bundle.metadata.item_count, "bundle written");
    Ok(())
}

/// Reads and verifies a bundle from `path`.
///
/// # Errors
///
/// Returns [`StoreError::Integrity`] if the checksum does not match, or an
/// I/O or codec error.
pub fn read_bundle(path: &Path) -> StoreResult<ExportBundle> {
    let json = fs::read_to_string(path)?;
    let bundle = ExportBundle::from_json(&json)?;
    bundle.verify()?;
    Ok(bundle)
}

/// Saves the full contents of `store` to `path`.
///
/// # Errors
///
/// Returns an error if export or writing fails.
pub fn save_snapshot(store: &VersionedStore, path: &Path) -> StoreResult<ExportBundle> {
    let bundle = store.export_all()?;
    write_bundle(path, &bundle)?;
    Ok(bundle)
}

/// Builds a store from the snapshot at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, fails verification or is
/// structurally invalid.
pub fn load_snapshot(path: &Path, config: StoreConfig) -> StoreResult<VersionedStore> {
    let bundle = read_bundle(path)?;
    let store = VersionedStore::new(config);
    store.import(&bundle, ImportOptions::replace())?;
    Ok(store)
}

/// Returns true if `err` means the snapshot file does not exist.
pub fn is_missing(err: &StoreError) -> bool {
    matches!(err, StoreError::Io(io) if io.kind() == std::io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tidesync_protocol::{EncryptedSyncData, PushItem, IV_SIZE, TAG_SIZE};

    fn populated() -> VersionedStore {
        let store = VersionedStore::default();
        for id in ["a", "b"] {
            store.push(PushItem::put(
                "reminder",
                id,
                EncryptedSyncData::new([1; IV_SIZE], [2; TAG_SIZE], vec![3; 6]),
                0,
                10,
            ));
        }
        store
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("backend.json");

        let store = populated();
        save_snapshot(&store, &path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = load_snapshot(&path, StoreConfig::default()).unwrap();
        assert_eq!(loaded.len(), 2);
        let original = store.item("reminder", "a").unwrap();
        let restored = loaded.item("reminder", "a").unwrap();
        assert_eq!(
            (restored.version, &restored.data, restored.modified_at),
            (original.version, &original.data, original.modified_at)
        );
    }

    #[test]
    fn corrupted_snapshot_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backend.json");
        save_snapshot(&populated(), &path).unwrap();

        let mut bundle = ExportBundle::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        bundle.items[1].modified_at += 1;
        fs::write(&path, bundle.to_json().unwrap()).unwrap();

        let err = load_snapshot(&path, StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::Integrity { .. }));
    }

    #[test]
    fn missing_snapshot_detected() {
        let dir = tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("absent.json"), StoreConfig::default()).unwrap_err();
        assert!(is_missing(&err));
    }
}
