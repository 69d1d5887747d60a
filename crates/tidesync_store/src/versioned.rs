//! The versioned entity store.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tidesync_protocol::{
    now_millis, BatchPushResult, ConflictRecord, EncryptedSyncData, ExportBundle, FailureReason,
    ImportMode, ImportOptions, ImportReport, PullResult, PushItem, PushOutcome, Quota,
    RemoteVersion, SyncCursor, SyncItem,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
struct StoreState {
    /// `entity_type -> entity_id -> item`.
    entities: BTreeMap<String, BTreeMap<String, SyncItem>>,
    /// `(scope, entity_type) -> cursor`.
    cursors: HashMap<(String, String), SyncCursor>,
    used_bytes: u64,
    last_commit: u64,
    /// Set when a push was refused for quota, cleared by the next write.
    quota_refused: bool,
}

impl StoreState {
    fn get(&self, entity_type: &str, entity_id: &str) -> Option<&SyncItem> {
        self.entities.get(entity_type)?.get(entity_id)
    }

    /// Returns a commit timestamp strictly greater than every previous one.
    fn next_timestamp(&mut self) -> u64 {
        let timestamp = now_millis().max(self.last_commit + 1);
        self.last_commit = timestamp;
        timestamp
    }

    fn recompute_usage(&mut self) {
        self.used_bytes = self
            .entities
            .values()
            .flat_map(|by_id| by_id.values())
            .map(|item| item_size(&item.entity_type, &item.entity_id, &item.data))
            .sum();
    }
}

fn item_size(entity_type: &str, entity_id: &str, data: &EncryptedSyncData) -> u64 {
    (entity_type.len() + entity_id.len()) as u64 + data.stored_size()
}

fn invalid_reason(entity_type: &str, entity_id: &str) -> Option<&'static str> {
    if entity_type.is_empty() {
        Some("empty entity type")
    } else if entity_id.is_empty() {
        Some("empty entity id")
    } else {
        None
    }
}

/// A remote store of encrypted entities with optimistic concurrency.
///
/// The store is a map of maps (`entity_type -> entity_id -> item`) guarded by
/// a single lock, so every operation is atomic with respect to the others.
///
/// # Invariants
///
/// - Versions are strictly increasing per `(entity_type, entity_id)`; new
///   entities have remote version 0
/// - A push whose `expected_version` differs from the remote version is a
///   conflict and leaves the store untouched
/// - Commit timestamps are strictly increasing across the whole store
/// - Cursors never regress
/// - Imports are validated in full before any item is applied, and every
///   imported item gets a fresh commit timestamp so existing cursors see it
///
/// Payloads are opaque [`EncryptedSyncData`]; the store never sees plaintext.
#[derive(Debug, Default)]
pub struct VersionedStore {
    config: StoreConfig,
    state: RwLock<StoreState>,
    /// Millis of the last push or pull; 0 before the first one.
    last_activity: AtomicU64,
}

impl VersionedStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(StoreState::default()),
            last_activity: AtomicU64::new(0),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Writes one item if its expected version matches.
    pub fn push(&self, item: PushItem) -> PushOutcome {
        let mut state = self.state.write();
        self.apply_push(&mut state, item)
    }

    /// Writes several items with per-item isolation.
    ///
    /// A refused or conflicting item never prevents the others from being
    /// applied. Results are returned in input order.
    pub fn batch_push(&self, items: Vec<PushItem>) -> BatchPushResult {
        let mut state = self.state.write();
        let mut result = BatchPushResult::default();

        for item in items {
            let entity_type = item.entity_type.clone();
            let entity_id = item.entity_id.clone();
            let outcome = self.apply_push(&mut state, item);
            result.record(entity_type, entity_id, outcome);
        }

        debug!(
            succeeded = result.succeeded,
            failed = result.failed,
            conflicts = result.conflicts,
            "batch push applied"
        );
        result
    }

    fn apply_push(&self, state: &mut StoreState, item: PushItem) -> PushOutcome {
        if let Some(reason) = invalid_reason(&item.entity_type, &item.entity_id) {
            return PushOutcome::Failure {
                reason: FailureReason::InvalidItem(reason.to_string()),
            };
        }

        let (remote_version, remote_timestamp, old_size) =
            match state.get(&item.entity_type, &item.entity_id) {
                Some(current) => (
                    current.version,
                    current.timestamp,
                    item_size(&current.entity_type, &current.entity_id, &current.data),
                ),
                None => (0, 0, 0),
            };

        if item.expected_version != remote_version {
            debug!(
                entity_type = %item.entity_type,
                entity_id = %item.entity_id,
                expected = item.expected_version,
                remote = remote_version,
                "push conflict"
            );
            return PushOutcome::Conflict {
                remote_version,
                remote_timestamp,
            };
        }

        let new_size = item_size(&item.entity_type, &item.entity_id, &item.data);
        let projected = state.used_bytes.saturating_sub(old_size) + new_size;
        if let Some(total) = self.config.quota_bytes {
            // Writes that shrink usage are always accepted.
            if new_size > old_size && projected > total {
                warn!(
                    entity_type = %item.entity_type,
                    used = state.used_bytes,
                    total,
                    "push refused: quota exceeded"
                );
                state.quota_refused = true;
                return PushOutcome::Failure {
                    reason: FailureReason::QuotaExceeded,
                };
            }
        }

        let timestamp = state.next_timestamp();
        let version = remote_version + 1;
        state.used_bytes = projected;
        state.quota_refused = false;
        self.last_activity.store(timestamp, Ordering::Relaxed);

        let stored = SyncItem {
            entity_type: item.entity_type,
            entity_id: item.entity_id,
            data: item.data,
            version,
            timestamp,
            modified_at: item.modified_at,
            deleted: item.deleted,
        };
        state
            .entities
            .entry(stored.entity_type.clone())
            .or_default()
            .insert(stored.entity_id.clone(), stored);

        PushOutcome::Success { version, timestamp }
    }

    /// Returns items of `entity_type` committed after the given position.
    ///
    /// Items are ordered by `(timestamp, version)`. Without `since_version`
    /// every item with a timestamp greater than `since_timestamp` qualifies;
    /// with it, items at exactly `since_timestamp` are included when their
    /// version is greater. At most `page_size` items are returned and
    /// `has_more` reports truncation.
    pub fn pull(
        &self,
        entity_type: &str,
        since_timestamp: u64,
        since_version: Option<u64>,
    ) -> PullResult {
        let position = (since_timestamp, since_version.unwrap_or(u64::MAX));
        let state = self.state.read();

        let mut matching: Vec<SyncItem> = state
            .entities
            .get(entity_type)
            .map(|by_id| {
                by_id
                    .values()
                    .filter(|item| (item.timestamp, item.version) > position)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(state);
        matching.sort_by(|a, b| {
            (a.timestamp, a.version, &a.entity_id).cmp(&(b.timestamp, b.version, &b.entity_id))
        });

        let total_items = matching.len() as u64;
        matching.truncate(self.config.page_size);
        let has_more = total_items > matching.len() as u64;

        let now = now_millis();
        let mut cursor = SyncCursor::initial(entity_type, now);
        cursor.last_sync_timestamp = since_timestamp;
        cursor.last_sync_version = since_version.unwrap_or(0);
        if let Some(last) = matching.last() {
            cursor = cursor.advance(last.timestamp, last.version);
        }
        self.last_activity.store(now, Ordering::Relaxed);

        debug!(
            entity_type,
            since_timestamp,
            returned = matching.len(),
            total_items,
            has_more,
            "pull served"
        );

        PullResult {
            items: matching,
            cursor,
            has_more,
            total_items,
        }
    }

    /// Returns the current item, including tombstones.
    pub fn item(&self, entity_type: &str, entity_id: &str) -> Option<SyncItem> {
        self.state.read().get(entity_type, entity_id).cloned()
    }

    /// Returns the current version of an entity.
    pub fn remote_version(&self, entity_type: &str, entity_id: &str) -> Option<RemoteVersion> {
        self.state
            .read()
            .get(entity_type, entity_id)
            .map(SyncItem::remote_version)
    }

    /// Writes a resolved value over the version recorded in `conflict`.
    ///
    /// If another writer committed since the conflict was observed, this
    /// reports a new conflict.
    pub fn resolve(&self, conflict: &ConflictRecord, mut resolved: PushItem) -> PushOutcome {
        if resolved.key() != (conflict.entity_type.as_str(), conflict.entity_id.as_str()) {
            return PushOutcome::Failure {
                reason: FailureReason::InvalidItem(
                    "resolution targets a different entity".to_string(),
                ),
            };
        }
        resolved.expected_version = conflict.remote_version;
        self.push(resolved)
    }

    /// Returns the cursor stored for `(scope, entity_type)`.
    pub fn cursor(&self, scope: &str, entity_type: &str) -> Option<SyncCursor> {
        self.state
            .read()
            .cursors
            .get(&(scope.to_string(), entity_type.to_string()))
            .cloned()
    }

    /// Merges `cursor` into the stored cursor and returns the result.
    ///
    /// A cursor behind the stored one leaves the store unchanged.
    pub fn update_cursor(&self, scope: &str, cursor: SyncCursor) -> SyncCursor {
        let mut state = self.state.write();
        let key = (scope.to_string(), cursor.entity_type.clone());
        let merged = match state.cursors.get(&key) {
            Some(existing) => existing.merge(&cursor),
            None => cursor,
        };
        state.cursors.insert(key, merged.clone());
        merged
    }

    /// Returns the storage accounting.
    pub fn quota(&self) -> Quota {
        let used = self.state.read().used_bytes;
        match self.config.quota_bytes {
            Some(total) => Quota::new(used, total),
            None => Quota::unlimited(used),
        }
    }

    /// Returns true if usage reached the total or the last write was
    /// refused for quota.
    pub fn quota_exceeded(&self) -> bool {
        let state = self.state.read();
        let full = self
            .config
            .quota_bytes
            .is_some_and(|total| state.used_bytes >= total);
        full || state.quota_refused
    }

    /// Returns the time of the last push or pull.
    pub fn last_activity(&self) -> Option<u64> {
        match self.last_activity.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    /// Returns the number of stored items, including tombstones.
    pub fn len(&self) -> usize {
        self.state.read().entities.values().map(BTreeMap::len).sum()
    }

    /// Returns true if the store holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the entity types present in the store, sorted.
    pub fn entity_types(&self) -> Vec<String> {
        self.state.read().entities.keys().cloned().collect()
    }

    /// Exports every item as a checksummed bundle.
    pub fn export_all(&self) -> StoreResult<ExportBundle> {
        let items: Vec<SyncItem> = {
            let state = self.state.read();
            state
                .entities
                .values()
                .flat_map(|by_id| by_id.values().cloned())
                .collect()
        };
        let bundle = ExportBundle::seal(items, now_millis(), self.config.name.clone())?;
        info!(items = bundle.metadata.item_count, "store exported");
        Ok(bundle)
    }

    /// Imports a bundle.
    ///
    /// The bundle is verified in full before anything is applied; on any
    /// error the store is unchanged. In [`ImportMode::Merge`] existing items
    /// whose version is at least the incoming version are kept. Imports are
    /// not subject to the quota. With `dry_run` the report is computed but
    /// nothing is written.
    ///
    /// Imported items keep their version and payload but are committed at a
    /// new timestamp, so devices whose cursors are past the bundle's original
    /// commit times still pull them.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Integrity`] if the checksum does not match
    /// - [`StoreError::UnsupportedBundleVersion`] for unknown formats
    /// - [`StoreError::InvalidBundle`] for duplicate keys or empty IDs
    pub fn import(&self, bundle: &ExportBundle, options: ImportOptions) -> StoreResult<ImportReport> {
        bundle.verify()?;
        validate_bundle(bundle)?;

        let mut state = self.state.write();
        let mut next = match options.mode {
            ImportMode::Merge => state.clone(),
            ImportMode::Replace => StoreState {
                entities: BTreeMap::new(),
                ..state.clone()
            },
        };

        let mut report = ImportReport::default();
        for item in &bundle.items {
            let existing = next.get(&item.entity_type, &item.entity_id).map(|e| e.version);
            if matches!(existing, Some(version) if version >= item.version) {
                report.skipped += 1;
                continue;
            }
            let mut stored = item.clone();
            stored.timestamp = next.next_timestamp();
            next.entities
                .entry(stored.entity_type.clone())
                .or_default()
                .insert(stored.entity_id.clone(), stored);
            report.imported += 1;
        }
        next.recompute_usage();
        next.quota_refused = false;

        if !options.dry_run {
            *state = next;
        }

        info!(
            imported = report.imported,
            skipped = report.skipped,
            mode = ?options.mode,
            dry_run = options.dry_run,
            "bundle imported"
        );
        Ok(report)
    }
}

fn validate_bundle(bundle: &ExportBundle) -> StoreResult<()> {
    let mut seen = HashSet::with_capacity(bundle.items.len());
    for item in &bundle.items {
        if let Some(reason) = invalid_reason(&item.entity_type, &item.entity_id) {
            return Err(StoreError::InvalidBundle(reason.to_string()));
        }
        if item.version == 0 {
            return Err(StoreError::InvalidBundle(format!(
                "{}/{} has version 0",
                item.entity_type, item.entity_id
            )));
        }
        if !seen.insert(item.key()) {
            return Err(StoreError::InvalidBundle(format!(
                "duplicate item {}/{}",
                item.entity_type, item.entity_id
            )));
        }
    }
    Ok(())
}
