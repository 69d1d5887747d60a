//! Push conflict records.

use serde::{Deserialize, Serialize};

/// Versions involved in a rejected push.
///
/// Resolving a conflict writes with `expected_version = remote_version`, so a
/// third writer racing the resolution is detected the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Version the rejected push expected.
    pub expected_version: u64,
    /// Version the backend held at rejection time.
    pub remote_version: u64,
}

impl ConflictRecord {
    /// Creates a new conflict record.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        expected_version: u64,
        remote_version: u64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            expected_version,
            remote_version,
        }
    }

    /// Returns true if both writers created the entity independently.
    pub fn is_create_conflict(&self) -> bool {
        self.expected_version == 0 && self.remote_version > 0
    }
}
