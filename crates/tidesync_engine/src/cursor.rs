//! Client-side cursor persistence.

use crate::error::{SyncError, SyncResult};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tidesync_protocol::SyncCursor;
use tracing::debug;

/// Stores one pull cursor per entity type.
///
/// `save` never moves a cursor backwards: the stored cursor is merged with
/// the new one and the merged result is returned.
pub trait CursorStore: Send + Sync {
    /// Loads the cursor for `entity_type`.
    fn load(&self, entity_type: &str) -> SyncResult<Option<SyncCursor>>;

    /// Saves a cursor, returning the stored (merged) value.
    fn save(&self, cursor: &SyncCursor) -> SyncResult<SyncCursor>;
}

fn merge_into(map: &mut BTreeMap<String, SyncCursor>, cursor: &SyncCursor) -> SyncCursor {
    let merged = match map.get(&cursor.entity_type) {
        Some(existing) => existing.merge(cursor),
        None => cursor.clone(),
    };
    map.insert(cursor.entity_type.clone(), merged.clone());
    merged
}

/// In-memory cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<BTreeMap<String, SyncCursor>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, entity_type: &str) -> SyncResult<Option<SyncCursor>> {
        Ok(self.cursors.read().get(entity_type).cloned())
    }

    fn save(&self, cursor: &SyncCursor) -> SyncResult<SyncCursor> {
        Ok(merge_into(&mut self.cursors.write(), cursor))
    }
}

/// Cursor store backed by a JSON file.
///
/// Every save rewrites the whole file through a temporary sibling and a
/// rename, holding an exclusive advisory lock on `<path>.lock` meanwhile.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    lock_path: PathBuf,
    cursors: RwLock<BTreeMap<String, SyncCursor>>,
    write_guard: Mutex<()>,
}

fn local(err: impl std::fmt::Display) -> SyncError {
    SyncError::LocalStore(err.to_string())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn write_atomically(path: &Path, contents: &str) -> SyncResult<()> {
    let tmp = sibling(path, ".tmp");
    let mut file = fs::File::create(&tmp).map_err(local)?;
    file.write_all(contents.as_bytes()).map_err(local)?;
    file.sync_all().map_err(local)?;
    fs::rename(&tmp, path).map_err(local)
}

impl FileCursorStore {
    /// Opens (or creates) the cursor file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalStore`] if the file exists but cannot be
    /// read or parsed.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(local)?;
            }
        }

        let cursors = if path.exists() {
            let json = fs::read_to_string(&path).map_err(local)?;
            serde_json::from_str(&json).map_err(local)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            lock_path: sibling(&path, ".lock"),
            path,
            cursors: RwLock::new(cursors),
            write_guard: Mutex::new(()),
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, cursors: &BTreeMap<String, SyncCursor>) -> SyncResult<()> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(local)?;
        FileExt::lock_exclusive(&lock_file).map_err(local)?;

        let result = serde_json::to_string_pretty(cursors)
            .map_err(local)
            .and_then(|json| write_atomically(&self.path, &json));

        let _ = FileExt::unlock(&lock_file);
        result
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, entity_type: &str) -> SyncResult<Option<SyncCursor>> {
        Ok(self.cursors.read().get(entity_type).cloned())
    }

    fn save(&self, cursor: &SyncCursor) -> SyncResult<SyncCursor> {
        let _guard = self.write_guard.lock();
        let mut next = self.cursors.read().clone();
        let merged = merge_into(&mut next, cursor);
        self.persist(&next)?;
        *self.cursors.write() = next;
        debug!(
            entity_type = %merged.entity_type,
            timestamp = merged.last_sync_timestamp,
            version = merged.last_sync_version,
            "cursor saved"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cursor(entity_type: &str, ts: u64, version: u64) -> SyncCursor {
        SyncCursor::initial(entity_type, 1).advance(ts, version)
    }

    #[test]
    fn memory_store_never_moves_back() {
        let store = MemoryCursorStore::new();
        assert!(store.load("goal").unwrap().is_none());

        store.save(&cursor("goal", 100, 4)).unwrap();
        let kept = store.save(&cursor("goal", 50, 9)).unwrap();
        assert_eq!(kept.position(), (100, 4));
        assert_eq!(store.load("goal").unwrap().unwrap().position(), (100, 4));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("cursors.json");

        {
            let store = FileCursorStore::open(&path).unwrap();
            store.save(&cursor("goal", 10, 1)).unwrap();
            store.save(&cursor("task", 20, 2)).unwrap();
            store.save(&cursor("goal", 30, 3)).unwrap();
        }

        let store = FileCursorStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.load("goal").unwrap().unwrap().position(), (30, 3));
        assert_eq!(store.load("task").unwrap().unwrap().position(), (20, 2));
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileCursorStore::open(&path),
            Err(SyncError::LocalStore(_))
        ));
    }
}
