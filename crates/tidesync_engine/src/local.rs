//! Local-store accessor.
//!
//! Feature modules own their data; the coordinator only sees it through
//! [`LocalStore`]. Local edits set a dirty flag and bump a revision counter.
//! The coordinator reads dirty entities, writes back what it pulled or
//! merged, and clears dirty flags once the backend accepted a push. A
//! revision check guards every write-back so an edit made while a cycle was
//! in flight is never lost.

use crate::resolver::Winner;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use tidesync_protocol::{now_millis, Quota};

/// An entity as held by the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    /// Entity ID.
    pub entity_id: String,
    /// Plaintext value (`Null` once deleted).
    pub value: Value,
    /// Last remote version this copy is based on (0 = never synced).
    pub version: u64,
    /// Time of the last edit (Unix millis).
    pub modified_at: u64,
    /// Tombstone flag.
    pub deleted: bool,
    /// Has local changes not yet accepted by the backend.
    pub dirty: bool,
    /// Incremented by every local edit.
    pub revision: u64,
}

/// A decrypted remote item ready to be applied locally.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    /// Entity ID.
    pub entity_id: String,
    /// Decrypted value (`Null` for tombstones).
    pub value: Value,
    /// Remote version.
    pub version: u64,
    /// Time of the last edit (Unix millis).
    pub modified_at: u64,
    /// Tombstone flag.
    pub deleted: bool,
}

/// Events the coordinator reports to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    /// A pulled item could not be decrypted and was skipped.
    DecryptionFailed {
        /// Entity type.
        entity_type: String,
        /// Entity ID.
        entity_id: String,
        /// Remote version that was skipped.
        version: u64,
        /// Failure description.
        reason: String,
    },
    /// The backend is over quota; pushes are paused.
    QuotaExceeded {
        /// Quota snapshot, if the adapter reported one.
        quota: Option<Quota>,
    },
    /// A conflict was resolved.
    ConflictResolved {
        /// Entity type.
        entity_type: String,
        /// Entity ID.
        entity_id: String,
        /// Side that was kept.
        winner: Winner,
    },
}

/// Access to the local copies of one entity type.
///
/// Implementations must be cheap to call from async code; none of the
/// methods may block on I/O for long.
pub trait LocalStore: Send + Sync {
    /// Returns the local copy of an entity.
    fn get(&self, entity_id: &str) -> Option<LocalEntity>;

    /// Returns every dirty entity.
    fn dirty_entities(&self) -> Vec<LocalEntity>;

    /// Replaces the local copy with a remote one and clears the dirty flag.
    ///
    /// Returns false (and changes nothing) if the entity's revision is no
    /// longer `observed_revision`.
    fn apply_remote(&self, remote: &RemoteEntity, observed_revision: u64) -> bool;

    /// Moves a dirty entity onto `base_version`, keeping it dirty.
    ///
    /// With `replacement` the value (and tombstone flag, for `Null`) is
    /// replaced too. Returns false if the revision changed.
    fn rebase(
        &self,
        entity_id: &str,
        base_version: u64,
        replacement: Option<Value>,
        observed_revision: u64,
    ) -> bool;

    /// Records that `version` was accepted by the backend.
    ///
    /// The dirty flag is cleared only if the revision is still
    /// `observed_revision`; the version is recorded either way.
    fn mark_synced(&self, entity_id: &str, version: u64, observed_revision: u64) -> bool;

    /// Receives a notice.
    fn notify(&self, notice: SyncNotice);
}

/// In-memory reference implementation of [`LocalStore`].
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entities: RwLock<BTreeMap<String, LocalEntity>>,
    notices: RwLock<Vec<SyncNotice>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a value as a local edit.
    pub fn put(&self, entity_id: impl Into<String>, value: Value) {
        self.put_at(entity_id, value, now_millis());
    }

    /// Writes a value as a local edit made at `modified_at`.
    pub fn put_at(&self, entity_id: impl Into<String>, value: Value, modified_at: u64) {
        self.edit(entity_id.into(), Some(value), modified_at);
    }

    /// Deletes an entity as a local edit.
    pub fn delete(&self, entity_id: impl Into<String>) {
        self.delete_at(entity_id, now_millis());
    }

    /// Deletes an entity as a local edit made at `modified_at`.
    pub fn delete_at(&self, entity_id: impl Into<String>, modified_at: u64) {
        self.edit(entity_id.into(), None, modified_at);
    }

    fn edit(&self, entity_id: String, value: Option<Value>, modified_at: u64) {
        let mut entities = self.entities.write();
        let entry = entities
            .entry(entity_id.clone())
            .or_insert_with(|| LocalEntity {
                entity_id,
                value: Value::Null,
                version: 0,
                modified_at: 0,
                deleted: false,
                dirty: false,
                revision: 0,
            });
        entry.deleted = value.is_none();
        entry.value = value.unwrap_or(Value::Null);
        entry.modified_at = modified_at;
        entry.dirty = true;
        entry.revision += 1;
    }

    /// Returns the live value of an entity.
    pub fn value(&self, entity_id: &str) -> Option<Value> {
        self.entities
            .read()
            .get(entity_id)
            .filter(|e| !e.deleted)
            .map(|e| e.value.clone())
    }

    /// Returns true if the entity has unsynced changes.
    pub fn is_dirty(&self, entity_id: &str) -> bool {
        self.entities
            .read()
            .get(entity_id)
            .is_some_and(|e| e.dirty)
    }

    /// Returns every live entity ID and value.
    pub fn live_values(&self) -> BTreeMap<String, Value> {
        self.entities
            .read()
            .values()
            .filter(|e| !e.deleted)
            .map(|e| (e.entity_id.clone(), e.value.clone()))
            .collect()
    }

    /// Returns the notices received so far.
    pub fn notices(&self) -> Vec<SyncNotice> {
        self.notices.read().clone()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, entity_id: &str) -> Option<LocalEntity> {
        self.entities.read().get(entity_id).cloned()
    }

    fn dirty_entities(&self) -> Vec<LocalEntity> {
        self.entities
            .read()
            .values()
            .filter(|e| e.dirty)
            .cloned()
            .collect()
    }

    fn apply_remote(&self, remote: &RemoteEntity, observed_revision: u64) -> bool {
        let mut entities = self.entities.write();
        let revision = entities.get(&remote.entity_id).map_or(0, |e| e.revision);
        if revision != observed_revision {
            return false;
        }
        entities.insert(
            remote.entity_id.clone(),
            LocalEntity {
                entity_id: remote.entity_id.clone(),
                value: remote.value.clone(),
                version: remote.version,
                modified_at: remote.modified_at,
                deleted: remote.deleted,
                dirty: false,
                revision,
            },
        );
        true
    }

    fn rebase(
        &self,
        entity_id: &str,
        base_version: u64,
        replacement: Option<Value>,
        observed_revision: u64,
    ) -> bool {
        let mut entities = self.entities.write();
        let Some(entity) = entities.get_mut(entity_id) else {
            return false;
        };
        if entity.revision != observed_revision {
            return false;
        }
        entity.version = base_version;
        if let Some(value) = replacement {
            entity.deleted = value.is_null();
            entity.value = value;
            entity.modified_at = entity.modified_at.max(now_millis());
        }
        entity.dirty = true;
        true
    }

    fn mark_synced(&self, entity_id: &str, version: u64, observed_revision: u64) -> bool {
        let mut entities = self.entities.write();
        let Some(entity) = entities.get_mut(entity_id) else {
            return false;
        };
        entity.version = entity.version.max(version);
        if entity.revision != observed_revision {
            return false;
        }
        entity.dirty = false;
        true
    }

    fn notify(&self, notice: SyncNotice) {
        self.notices.write().push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(id: &str, version: u64) -> RemoteEntity {
        RemoteEntity {
            entity_id: id.into(),
            value: json!({"v": version}),
            version,
            modified_at: version * 10,
            deleted: false,
        }
    }

    #[test]
    fn edits_mark_dirty_and_bump_revision() {
        let store = MemoryLocalStore::new();
        store.put("g1", json!({"title": "a"}));
        store.put("g1", json!({"title": "b"}));

        let entity = store.get("g1").unwrap();
        assert!(entity.dirty);
        assert_eq!(entity.revision, 2);
        assert_eq!(entity.version, 0);
        assert_eq!(store.dirty_entities().len(), 1);
    }

    #[test]
    fn apply_remote_respects_revision() {
        let store = MemoryLocalStore::new();
        assert!(store.apply_remote(&remote("g1", 1), 0));
        assert!(!store.is_dirty("g1"));
        assert_eq!(store.value("g1"), Some(json!({"v": 1})));

        store.put("g1", json!({"local": true}));
        assert!(!store.apply_remote(&remote("g1", 2), 0));
        assert_eq!(store.value("g1"), Some(json!({"local": true})));
    }

    #[test]
    fn mark_synced_keeps_newer_edits_dirty() {
        let store = MemoryLocalStore::new();
        store.put("g1", json!(1));
        let seen = store.get("g1").unwrap().revision;
        store.put("g1", json!(2));

        assert!(!store.mark_synced("g1", 1, seen));
        let entity = store.get("g1").unwrap();
        assert!(entity.dirty);
        assert_eq!(entity.version, 1);

        assert!(store.mark_synced("g1", 2, entity.revision));
        assert!(!store.is_dirty("g1"));
    }

    #[test]
    fn rebase_replaces_value_and_stays_dirty() {
        let store = MemoryLocalStore::new();
        store.put_at("g1", json!({"n": 1}), 5);
        let revision = store.get("g1").unwrap().revision;

        assert!(store.rebase("g1", 3, Some(json!({"n": 2})), revision));
        let entity = store.get("g1").unwrap();
        assert_eq!(entity.version, 3);
        assert_eq!(entity.value, json!({"n": 2}));
        assert!(entity.dirty);
        assert!(!store.rebase("missing", 1, None, 0));
    }

    #[test]
    fn delete_leaves_dirty_tombstone() {
        let store = MemoryLocalStore::new();
        store.put("g1", json!(1));
        store.delete("g1");

        let entity = store.get("g1").unwrap();
        assert!(entity.deleted);
        assert!(entity.dirty);
        assert_eq!(store.value("g1"), None);
        assert!(store.live_values().is_empty());
    }

    #[test]
    fn notices_are_recorded() {
        let store = MemoryLocalStore::new();
        store.notify(SyncNotice::QuotaExceeded { quota: None });
        assert_eq!(store.notices(), vec![SyncNotice::QuotaExceeded { quota: None }]);
    }
}
