//! Incremental pull positions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Resume position for one entity type.
///
/// Cursors are ordered by `(last_sync_timestamp, last_sync_version)` and
/// never move backwards: [`SyncCursor::advance`] and [`SyncCursor::merge`]
/// keep the greater position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Entity type this cursor belongs to.
    pub entity_type: String,
    /// Commit timestamp of the last applied item.
    pub last_sync_timestamp: u64,
    /// Version of the last applied item.
    pub last_sync_version: u64,
    /// When this cursor was first created (Unix millis).
    pub created_at: u64,
}

impl SyncCursor {
    /// Creates a cursor positioned before every item.
    pub fn initial(entity_type: impl Into<String>, created_at: u64) -> Self {
        Self {
            entity_type: entity_type.into(),
            last_sync_timestamp: 0,
            last_sync_version: 0,
            created_at,
        }
    }

    /// Returns true if nothing has been pulled yet.
    pub fn is_initial(&self) -> bool {
        self.last_sync_timestamp == 0 && self.last_sync_version == 0
    }

    /// Returns the ordering position.
    pub fn position(&self) -> (u64, u64) {
        (self.last_sync_timestamp, self.last_sync_version)
    }

    /// Returns a cursor moved to `(timestamp, version)`, unless that would
    /// move it backwards.
    #[must_use]
    pub fn advance(&self, timestamp: u64, version: u64) -> Self {
        let mut next = self.clone();
        if (timestamp, version) > self.position() {
            next.last_sync_timestamp = timestamp;
            next.last_sync_version = version;
        }
        next
    }

    /// Merges another cursor for the same entity type, keeping the greater
    /// position and the earliest creation time.
    #[must_use]
    pub fn merge(&self, other: &SyncCursor) -> Self {
        let mut merged = self.advance(other.last_sync_timestamp, other.last_sync_version);
        merged.created_at = self.created_at.min(other.created_at);
        merged
    }

    /// Compares positions, ignoring entity type and creation time.
    pub fn cmp_position(&self, other: &SyncCursor) -> Ordering {
        self.position().cmp(&other.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn initial_cursor() {
        let cursor = SyncCursor::initial("goal", 5);
        assert!(cursor.is_initial());
        assert_eq!(cursor.position(), (0, 0));
        assert_eq!(cursor.created_at, 5);
    }

    #[test]
    fn advance_moves_forward() {
        let cursor = SyncCursor::initial("goal", 0).advance(100, 3);
        assert_eq!(cursor.position(), (100, 3));
        assert!(!cursor.is_initial());
    }

    #[test]
    fn advance_never_regresses() {
        let cursor = SyncCursor::initial("goal", 0).advance(100, 3);
        assert_eq!(cursor.advance(50, 9).position(), (100, 3));
        assert_eq!(cursor.advance(100, 2).position(), (100, 3));
        assert_eq!(cursor.advance(100, 4).position(), (100, 4));
    }

    #[test]
    fn merge_keeps_earliest_creation() {
        let a = SyncCursor::initial("goal", 10).advance(5, 1);
        let b = SyncCursor::initial("goal", 3).advance(2, 1);
        let merged = a.merge(&b);
        assert_eq!(merged.position(), (5, 1));
        assert_eq!(merged.created_at, 3);
    }

    proptest! {
        #[test]
        fn advance_is_monotonic(steps in prop::collection::vec((0u64..1_000, 0u64..50), 1..40)) {
            let mut cursor = SyncCursor::initial("task", 0);
            for (ts, version) in steps {
                let next = cursor.advance(ts, version);
                prop_assert!(next.cmp_position(&cursor) != Ordering::Less);
                cursor = next;
            }
        }
    }
}
