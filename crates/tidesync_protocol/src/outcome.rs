//! Typed outcomes of push and pull.

use crate::cursor::SyncCursor;
use crate::item::SyncItem;
use serde::{Deserialize, Serialize};

/// Why a single push was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The backend is over its storage quota.
    QuotaExceeded,
    /// The item itself is invalid (empty ID, unknown type, ...).
    InvalidItem(String),
    /// The backend refused the write for another reason.
    Rejected(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::QuotaExceeded => f.write_str("quota exceeded"),
            FailureReason::InvalidItem(msg) => write!(f, "invalid item: {}", msg),
            FailureReason::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

/// Outcome of one optimistic-concurrency write.
///
/// A conflict is data, not an error: the remote value was left untouched
/// and the caller is expected to resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// The write was applied.
    Success {
        /// New remote version.
        version: u64,
        /// Commit timestamp.
        timestamp: u64,
    },
    /// The expected version did not match; nothing was written.
    Conflict {
        /// Version currently held by the backend.
        remote_version: u64,
        /// Commit timestamp of that version.
        remote_timestamp: u64,
    },
    /// The write was refused.
    Failure {
        /// Reason for the refusal.
        reason: FailureReason,
    },
}

impl PushOutcome {
    /// Returns true if the write was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, PushOutcome::Success { .. })
    }

    /// Returns true if the write hit a version conflict.
    pub fn conflict_detected(&self) -> bool {
        matches!(self, PushOutcome::Conflict { .. })
    }

    /// Returns the new version (on success) or the remote version (on conflict).
    pub fn version(&self) -> Option<u64> {
        match self {
            PushOutcome::Success { version, .. } => Some(*version),
            PushOutcome::Conflict { remote_version, .. } => Some(*remote_version),
            PushOutcome::Failure { .. } => None,
        }
    }
}

/// Result of one pull page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResult {
    /// Items in ascending commit order.
    pub items: Vec<SyncItem>,
    /// Position after the last returned item (or the request position if empty).
    pub cursor: SyncCursor,
    /// Whether the backend truncated the page.
    pub has_more: bool,
    /// Number of items after the request position, before truncation.
    pub total_items: u64,
}

impl PullResult {
    /// Returns an empty page positioned at `cursor`.
    pub fn empty(cursor: SyncCursor) -> Self {
        Self {
            items: Vec::new(),
            cursor,
            has_more: false,
            total_items: 0,
        }
    }
}

/// Outcome of one item inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Outcome.
    pub outcome: PushOutcome,
}

/// Aggregate outcome of a best-effort batch push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPushResult {
    /// Number of applied writes.
    pub succeeded: u64,
    /// Number of refused writes.
    pub failed: u64,
    /// Number of version conflicts.
    pub conflicts: u64,
    /// Per-item outcomes, in request order.
    pub results: Vec<BatchItemResult>,
}

impl BatchPushResult {
    /// Records one item outcome, updating the counters.
    pub fn record(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        outcome: PushOutcome,
    ) {
        match &outcome {
            PushOutcome::Success { .. } => self.succeeded += 1,
            PushOutcome::Conflict { .. } => self.conflicts += 1,
            PushOutcome::Failure { .. } => self.failed += 1,
        }
        self.results.push(BatchItemResult {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            outcome,
        });
    }

    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
