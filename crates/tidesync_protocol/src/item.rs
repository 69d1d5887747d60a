//! Units of push and pull.

use crate::payload::EncryptedSyncData;
use serde::{Deserialize, Serialize};

/// One entity's synchronizable state as stored by the backend.
///
/// # Fields
///
/// - `version`: remote version, strictly increasing per `(entity_type, entity_id)`
/// - `timestamp`: backend commit time in Unix millis; strictly increasing
///   per store and used as the pull cursor position
/// - `modified_at`: wall-clock time of the writer's last edit, used by
///   last-write-wins resolution
/// - `deleted`: the entity is a tombstone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Entity type (e.g. `goal`).
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Encrypted payload.
    pub data: EncryptedSyncData,
    /// Remote version.
    pub version: u64,
    /// Backend commit timestamp (Unix millis).
    pub timestamp: u64,
    /// Writer's edit timestamp (Unix millis).
    pub modified_at: u64,
    /// Whether the entity was deleted.
    #[serde(default)]
    pub deleted: bool,
}

impl SyncItem {
    /// Returns the `(entity_type, entity_id)` key.
    pub fn key(&self) -> (&str, &str) {
        (&self.entity_type, &self.entity_id)
    }

    /// Returns the version probe view of this item.
    pub fn remote_version(&self) -> RemoteVersion {
        RemoteVersion {
            version: self.version,
            timestamp: self.timestamp,
            deleted: self.deleted,
        }
    }
}

/// A write request carrying optimistic-concurrency information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushItem {
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Encrypted payload.
    pub data: EncryptedSyncData,
    /// Version the writer believes the backend holds (0 for new entities).
    pub expected_version: u64,
    /// Writer's edit timestamp (Unix millis).
    pub modified_at: u64,
    /// Whether this write is a delete.
    #[serde(default)]
    pub deleted: bool,
}

impl PushItem {
    /// Creates a put request.
    pub fn put(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: EncryptedSyncData,
        expected_version: u64,
        modified_at: u64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            data,
            expected_version,
            modified_at,
            deleted: false,
        }
    }

    /// Creates a delete request.
    ///
    /// Deletes still carry an encrypted (usually empty) payload so the
    /// backend never stores plaintext markers.
    pub fn delete(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: EncryptedSyncData,
        expected_version: u64,
        modified_at: u64,
    ) -> Self {
        Self {
            deleted: true,
            ..Self::put(entity_type, entity_id, data, expected_version, modified_at)
        }
    }

    /// Returns the `(entity_type, entity_id)` key.
    pub fn key(&self) -> (&str, &str) {
        (&self.entity_type, &self.entity_id)
    }
}

/// Result of a cheap version probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVersion {
    /// Current remote version.
    pub version: u64,
    /// Commit timestamp of that version.
    pub timestamp: u64,
    /// Whether the remote copy is a tombstone.
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{IV_SIZE, TAG_SIZE};

    fn data() -> EncryptedSyncData {
        EncryptedSyncData::new([0u8; IV_SIZE], [0u8; TAG_SIZE], vec![1, 2, 3])
    }

    #[test]
    fn delete_sets_flag() {
        let item = PushItem::delete("task", "t-1", data(), 4, 1000);
        assert!(item.deleted);
        assert_eq!(item.expected_version, 4);
        assert_eq!(item.key(), ("task", "t-1"));
    }

    #[test]
    fn sync_item_json_defaults_deleted() {
        let item = SyncItem {
            entity_type: "goal".into(),
            entity_id: "goal-1".into(),
            data: data(),
            version: 2,
            timestamp: 10,
            modified_at: 9,
            deleted: false,
        };
        let mut json = serde_json::to_value(&item).unwrap();
        json.as_object_mut().unwrap().remove("deleted");

        let back: SyncItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
        assert_eq!(
            back.remote_version(),
            RemoteVersion {
                version: 2,
                timestamp: 10,
                deleted: false
            }
        );
    }
}
