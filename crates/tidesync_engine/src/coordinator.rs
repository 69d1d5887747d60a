//! Sync coordinator.
//!
//! Drives one pull-then-push cycle per registered entity type:
//!
//! 1. Pull pages since the stored cursor and apply them in adapter order,
//!    routing dirty local copies through the [`ConflictResolver`]
//! 2. Persist the cursor after every fully applied page
//! 3. Encrypt dirty entities and push them in batches
//! 4. Resolve push conflicts against the fetched remote copy
//! 5. Refresh health and report quota problems to the local store
//!
//! Entity types run concurrently under [`SyncCoordinator::sync_all`]; work on
//! a single entity is serialised through [`EntityLocks`].

use crate::adapter::SyncAdapter;
use crate::config::CoordinatorOptions;
use crate::crypto::EncryptionService;
use crate::cursor::{CursorStore, MemoryCursorStore};
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalEntity, LocalStore, RemoteEntity, SyncNotice};
use crate::locks::EntityLocks;
use crate::resolver::{ConflictInput, ConflictResolver, EntityState, Resolution, Winner};
use crate::retry::{CancelToken, Retrier};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_protocol::{
    now_millis, ConflictRecord, ExportBundle, FailureReason, ImportOptions, ImportReport,
    PushItem, PushOutcome, SyncCursor, SyncItem,
};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Sync state of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle running.
    Idle,
    /// Fetching pages from the backend.
    Pulling,
    /// Writing pulled items to the local store.
    Applying,
    /// Sending dirty entities to the backend.
    Pushing,
    /// Reconciling a local and a remote copy.
    ConflictResolution,
    /// The last cycle failed.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pulling
                | SyncState::Applying
                | SyncState::Pushing
                | SyncState::ConflictResolution
        )
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Pulling => "pulling",
            SyncState::Applying => "applying",
            SyncState::Pushing => "pushing",
            SyncState::ConflictResolution => "conflict_resolution",
            SyncState::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that finished without error.
    pub cycles_completed: u64,
    /// Cycles that failed.
    pub cycles_failed: u64,
    /// Items received from the backend.
    pub items_pulled: u64,
    /// Pulled items written locally.
    pub items_applied: u64,
    /// Entities accepted by the backend.
    pub items_pushed: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Pulled items skipped because they failed to decrypt.
    pub decryption_failures: u64,
    /// Adapter calls retried.
    pub retries: u64,
    /// End of the last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one cycle for one entity type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Entity type.
    pub entity_type: String,
    /// Items received.
    pub pulled: u64,
    /// Items written locally (directly or as a conflict winner).
    pub applied: u64,
    /// Items already present locally.
    pub skipped: u64,
    /// Items that failed to decrypt.
    pub decryption_failures: u64,
    /// Entities accepted by the backend.
    pub pushed: u64,
    /// Conflicts resolved.
    pub conflicts: u64,
    /// Pushes refused by the backend.
    pub push_failures: u64,
    /// Pushes were paused because the backend is over quota.
    pub quota_paused: bool,
    /// Pages pulled.
    pub pages: u64,
    /// Wall time.
    pub duration: Duration,
}

impl CycleReport {
    fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            ..Self::default()
        }
    }
}

/// Result of [`SyncCoordinator::sync_all`].
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Completed cycles, sorted by entity type.
    pub cycles: Vec<CycleReport>,
    /// Entity types whose cycle failed.
    pub errors: Vec<(String, SyncError)>,
}

impl SyncReport {
    /// Returns true if every cycle completed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the report for one entity type.
    pub fn cycle(&self, entity_type: &str) -> Option<&CycleReport> {
        self.cycles.iter().find(|c| c.entity_type == entity_type)
    }
}

struct EntityEntry {
    store: Arc<dyn LocalStore>,
    state: SyncState,
    error_since: Option<Instant>,
}

/// Resets the entity type's state when a cycle ends, including when the
/// cycle's future is dropped.
struct CycleGuard<'a> {
    coordinator: &'a SyncCoordinator,
    entity_type: &'a str,
    failed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let mut entities = self.coordinator.entities.write();
        if let Some(entry) = entities.get_mut(self.entity_type) {
            if self.failed {
                entry.state = SyncState::Error;
                entry.error_since = Some(Instant::now());
            } else {
                entry.state = SyncState::Idle;
                entry.error_since = None;
            }
        }
    }
}

/// Coordinates sync cycles between local stores and one adapter.
pub struct SyncCoordinator {
    adapter: Arc<dyn SyncAdapter>,
    crypto: Arc<EncryptionService>,
    cursors: Arc<dyn CursorStore>,
    resolver: ConflictResolver,
    options: CoordinatorOptions,
    entities: RwLock<BTreeMap<String, EntityEntry>>,
    stats: RwLock<SyncStats>,
    retries: AtomicU64,
    locks: EntityLocks,
    cancel_tx: watch::Sender<u64>,
}

impl fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("entity_types", &self.entity_types())
            .field("options", &self.options)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Creates a coordinator with in-memory cursors and last-write-wins
    /// conflict resolution.
    pub fn new(adapter: Arc<dyn SyncAdapter>, crypto: Arc<EncryptionService>) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        Self {
            adapter,
            crypto,
            cursors: Arc::new(MemoryCursorStore::new()),
            resolver: ConflictResolver::new(),
            options: CoordinatorOptions::default(),
            entities: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(SyncStats::default()),
            retries: AtomicU64::new(0),
            locks: EntityLocks::new(),
            cancel_tx,
        }
    }

    /// Uses `cursors` to persist pull positions.
    #[must_use]
    pub fn with_cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = cursors;
        self
    }

    /// Uses `resolver` for conflicts.
    #[must_use]
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the coordinator tunables.
    #[must_use]
    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers the local store of an entity type.
    ///
    /// Re-registering replaces the store and resets the state to idle.
    pub fn register(&self, entity_type: impl Into<String>, store: Arc<dyn LocalStore>) {
        let entity_type = entity_type.into();
        debug!(entity_type = %entity_type, "entity type registered");
        self.entities.write().insert(
            entity_type,
            EntityEntry {
                store,
                state: SyncState::Idle,
                error_since: None,
            },
        );
    }

    /// Returns the registered entity types.
    pub fn entity_types(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    /// Returns the state of an entity type.
    pub fn state(&self, entity_type: &str) -> Option<SyncState> {
        self.entities.read().get(entity_type).map(|e| e.state)
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        let mut stats = self.stats.read().clone();
        stats.retries = self.retries.load(Ordering::Relaxed);
        stats
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &Arc<dyn SyncAdapter> {
        &self.adapter
    }

    /// Cancels every running cycle.
    ///
    /// In-flight adapter calls are abandoned, cursors of unfinished pages
    /// stay where they were and entity locks are released. Cycles started
    /// afterwards are unaffected.
    pub fn cancel(&self) {
        info!("sync cancelled");
        self.cancel_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn cancel_token(&self) -> CancelToken {
        CancelToken::new(self.cancel_tx.subscribe())
    }

    fn store_for(&self, entity_type: &str) -> SyncResult<Arc<dyn LocalStore>> {
        self.entities
            .read()
            .get(entity_type)
            .map(|e| Arc::clone(&e.store))
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))
    }

    fn set_state(&self, entity_type: &str, state: SyncState) {
        if let Some(entry) = self.entities.write().get_mut(entity_type) {
            entry.state = state;
        }
    }

    fn begin<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> SyncResult<(Arc<dyn LocalStore>, CycleGuard<'a>)> {
        let retry_delay = self.adapter.config().retry_delay;
        let mut entities = self.entities.write();
        let entry = entities
            .get_mut(entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))?;

        if entry.state.is_active() {
            return Err(SyncError::InvalidStateTransition {
                from: entry.state.to_string(),
                to: SyncState::Pulling.to_string(),
            });
        }
        if entry.state == SyncState::Error {
            let elapsed = entry.error_since.map_or(retry_delay, |at| at.elapsed());
            if elapsed < retry_delay {
                return Err(SyncError::BackingOff {
                    entity_type: entity_type.to_string(),
                    retry_in_ms: (retry_delay - elapsed).as_millis() as u64,
                });
            }
        }

        entry.state = SyncState::Pulling;
        Ok((
            Arc::clone(&entry.store),
            CycleGuard {
                coordinator: self,
                entity_type,
                failed: false,
            },
        ))
    }

    /// Runs one pull-then-push cycle for an entity type.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidStateTransition`] if a cycle is already running
    /// - [`SyncError::BackingOff`] if the previous cycle failed less than
    ///   `retry_delay` ago
    /// - any adapter, cursor or encryption error that aborted the cycle
    pub async fn sync_entity_type(&self, entity_type: &str) -> SyncResult<CycleReport> {
        let (store, mut guard) = self.begin(entity_type)?;
        let cancel = self.cancel_token();
        let started = Instant::now();

        let result = self.run_cycle(entity_type, store.as_ref(), &cancel).await;
        let mut stats = self.stats.write();
        match result {
            Ok(mut report) => {
                report.duration = started.elapsed();
                stats.cycles_completed += 1;
                stats.items_pulled += report.pulled;
                stats.items_applied += report.applied;
                stats.items_pushed += report.pushed;
                stats.conflicts_resolved += report.conflicts;
                stats.decryption_failures += report.decryption_failures;
                stats.last_sync_time = Some(Instant::now());
                info!(
                    entity_type,
                    pulled = report.pulled,
                    applied = report.applied,
                    pushed = report.pushed,
                    conflicts = report.conflicts,
                    duration_ms = report.duration.as_millis() as u64,
                    "sync cycle complete"
                );
                Ok(report)
            }
            Err(err) => {
                guard.failed = !matches!(err, SyncError::Cancelled);
                stats.cycles_failed += 1;
                stats.last_error = Some(err.to_string());
                error!(entity_type, error = %err, "sync cycle failed");
                Err(err)
            }
        }
    }

    async fn run_cycle(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        cancel: &CancelToken,
    ) -> SyncResult<CycleReport> {
        let retrier = Retrier::new(self.adapter.config(), cancel, &self.retries);
        let mut report = CycleReport::new(entity_type);

        self.pull_phase(entity_type, store, &retrier, cancel, &mut report)
            .await?;

        self.set_state(entity_type, SyncState::Pushing);
        self.push_phase(entity_type, store, &retrier, &mut report)
            .await?;

        let adapter = self.adapter.as_ref();
        let health = retrier
            .guarded(async { Ok::<_, SyncError>(adapter.check_health().await) })
            .await?;
        if health.quota_exceeded || report.quota_paused {
            let quota = retrier.guarded(adapter.get_quota()).await.ok();
            warn!(entity_type, ?quota, "backend over quota, pushes paused");
            report.quota_paused = true;
            store.notify(SyncNotice::QuotaExceeded { quota });
        }

        self.locks.prune();
        Ok(report)
    }

    async fn pull_phase(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        retrier: &Retrier<'_>,
        cancel: &CancelToken,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let adapter = self.adapter.as_ref();
        let mut cursor = match self.cursors.load(entity_type)? {
            Some(cursor) => cursor,
            None => SyncCursor::initial(entity_type, now_millis()),
        };

        for _ in 0..self.options.max_pages_per_cycle {
            let (since_ts, since_version) = cursor.position();
            let page = retrier
                .call("pull", move || {
                    adapter.pull(entity_type, since_ts, Some(since_version))
                })
                .await?;
            report.pages += 1;
            report.pulled += page.items.len() as u64;
            debug!(
                entity_type,
                items = page.items.len(),
                has_more = page.has_more,
                total = page.total_items,
                "pulled page"
            );

            if !page.items.is_empty() {
                self.set_state(entity_type, SyncState::Applying);
                for item in &page.items {
                    self.apply_pulled(entity_type, store, item, report).await;
                }
                self.set_state(entity_type, SyncState::Pulling);
            }

            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let next = cursor.advance(
                page.cursor.last_sync_timestamp,
                page.cursor.last_sync_version,
            );
            if next != cursor {
                cursor = self.cursors.save(&next)?;
                let mirrored = cursor.clone();
                match retrier
                    .guarded(adapter.update_cursor(mirrored))
                    .await
                {
                    Ok(_) => {}
                    Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(err) => debug!(entity_type, error = %err, "cursor mirror failed"),
                }
            }

            if !page.has_more {
                return Ok(());
            }
        }

        debug!(entity_type, "page budget exhausted, continuing next cycle");
        Ok(())
    }

    async fn apply_pulled(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        item: &SyncItem,
        report: &mut CycleReport,
    ) {
        let _guard = self.locks.acquire(entity_type, &item.entity_id).await;
        let local = store.get(&item.entity_id);
        if local.as_ref().is_some_and(|l| l.version >= item.version) {
            report.skipped += 1;
            return;
        }

        let Some(remote) = self.open_item(entity_type, store, item, report) else {
            return;
        };

        match local {
            Some(local) if local.dirty => {
                self.set_state(entity_type, SyncState::ConflictResolution);
                let resolution = self.settle(entity_type, store, &local, &remote, report);
                let written = match resolution.winner {
                    Winner::Remote => store.apply_remote(&remote, local.revision),
                    Winner::Local => {
                        store.rebase(&local.entity_id, remote.version, None, local.revision)
                    }
                    Winner::Merged => store.rebase(
                        &local.entity_id,
                        remote.version,
                        resolution.merged,
                        local.revision,
                    ),
                };
                if written {
                    report.applied += 1;
                }
                self.set_state(entity_type, SyncState::Applying);
            }
            local => {
                let revision = local.map_or(0, |l| l.revision);
                if store.apply_remote(&remote, revision) {
                    report.applied += 1;
                } else {
                    // Edited while we were applying; the push conflict
                    // picks it up.
                    report.skipped += 1;
                }
            }
        }
    }

    /// Decrypts a remote item, reporting failures to the store.
    fn open_item(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        item: &SyncItem,
        report: &mut CycleReport,
    ) -> Option<RemoteEntity> {
        let value = if item.deleted {
            Ok(Value::Null)
        } else {
            self.crypto.decrypt_json::<Value>(&item.data)
        };

        match value {
            Ok(value) => Some(RemoteEntity {
                entity_id: item.entity_id.clone(),
                value,
                version: item.version,
                modified_at: item.modified_at,
                deleted: item.deleted,
            }),
            Err(err) => {
                warn!(
                    entity_type,
                    entity_id = %item.entity_id,
                    version = item.version,
                    error = %err,
                    "skipping item that failed to decrypt"
                );
                report.decryption_failures += 1;
                store.notify(SyncNotice::DecryptionFailed {
                    entity_type: entity_type.to_string(),
                    entity_id: item.entity_id.clone(),
                    version: item.version,
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    fn settle(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        local: &LocalEntity,
        remote: &RemoteEntity,
        report: &mut CycleReport,
    ) -> Resolution {
        let input = ConflictInput {
            entity_type: entity_type.to_string(),
            entity_id: local.entity_id.clone(),
            local: EntityState {
                value: local.value.clone(),
                modified_at: local.modified_at,
                deleted: local.deleted,
            },
            remote: EntityState {
                value: remote.value.clone(),
                modified_at: remote.modified_at,
                deleted: remote.deleted,
            },
        };
        let resolution = self.resolver.resolve(&input);
        report.conflicts += 1;
        warn!(
            entity_type,
            entity_id = %local.entity_id,
            local_version = local.version,
            remote_version = remote.version,
            winner = ?resolution.winner,
            "conflict resolved"
        );
        store.notify(SyncNotice::ConflictResolved {
            entity_type: entity_type.to_string(),
            entity_id: local.entity_id.clone(),
            winner: resolution.winner,
        });
        resolution
    }

    /// Builds the push for a dirty entity, or returns `None` when a delete
    /// has nothing to remove remotely (the entity is then marked synced).
    async fn prepare_push(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        entity: &LocalEntity,
        retrier: &Retrier<'_>,
    ) -> SyncResult<Option<PushItem>> {
        if entity.deleted {
            let adapter = self.adapter.as_ref();
            let entity_id = entity.entity_id.as_str();
            let remote = retrier
                .call("get_remote_version", move || {
                    adapter.get_remote_version(entity_type, entity_id)
                })
                .await?;
            let settled_version = match remote {
                None => Some(entity.version),
                Some(remote) if remote.deleted => Some(remote.version),
                Some(_) => None,
            };
            if let Some(version) = settled_version {
                debug!(entity_type, entity_id, "delete needs no transfer");
                store.mark_synced(entity_id, version, entity.revision);
                return Ok(None);
            }
            let data = self.crypto.encrypt_json(&Value::Null)?;
            return Ok(Some(PushItem::delete(
                entity_type,
                entity_id,
                data,
                entity.version,
                entity.modified_at,
            )));
        }

        let data = self.crypto.encrypt_json(&entity.value)?;
        Ok(Some(PushItem::put(
            entity_type,
            entity.entity_id.clone(),
            data,
            entity.version,
            entity.modified_at,
        )))
    }

    async fn push_phase(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        retrier: &Retrier<'_>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let adapter = self.adapter.as_ref();
        let dirty = store.dirty_entities();
        if dirty.is_empty() {
            return Ok(());
        }

        for chunk in dirty.chunks(self.options.push_batch_size) {
            if report.quota_paused {
                break;
            }

            let mut guards = Vec::with_capacity(chunk.len());
            let mut items = Vec::with_capacity(chunk.len());
            let mut pending = HashMap::with_capacity(chunk.len());
            for candidate in chunk {
                let guard = self.locks.acquire(entity_type, &candidate.entity_id).await;
                let Some(entity) = store.get(&candidate.entity_id).filter(|e| e.dirty) else {
                    continue;
                };
                let Some(item) = self.prepare_push(entity_type, store, &entity, retrier).await?
                else {
                    continue;
                };
                items.push(item);
                pending.insert(entity.entity_id.clone(), entity);
                guards.push(guard);
            }
            if items.is_empty() {
                continue;
            }

            let batch = &items;
            let result = retrier
                .call("batch_push", move || adapter.batch_push(batch.clone()))
                .await?;
            debug!(
                entity_type,
                items = items.len(),
                succeeded = result.succeeded,
                conflicts = result.conflicts,
                failed = result.failed,
                "pushed batch"
            );

            for item_result in result.results {
                let Some(entity) = pending.get(&item_result.entity_id) else {
                    continue;
                };
                match item_result.outcome {
                    PushOutcome::Success { version, .. } => {
                        store.mark_synced(&entity.entity_id, version, entity.revision);
                        report.pushed += 1;
                    }
                    PushOutcome::Conflict { .. } => {
                        self.set_state(entity_type, SyncState::ConflictResolution);
                        self.resolve_push_conflict(entity_type, store, entity, retrier, report)
                            .await?;
                        self.set_state(entity_type, SyncState::Pushing);
                    }
                    PushOutcome::Failure { reason } => {
                        self.record_failure(entity_type, &entity.entity_id, &reason, report);
                    }
                }
            }
            drop(guards);
        }
        Ok(())
    }

    fn record_failure(
        &self,
        entity_type: &str,
        entity_id: &str,
        reason: &FailureReason,
        report: &mut CycleReport,
    ) {
        report.push_failures += 1;
        if *reason == FailureReason::QuotaExceeded {
            report.quota_paused = true;
        }
        warn!(entity_type, entity_id, ?reason, "push refused");
    }

    async fn resolve_push_conflict(
        &self,
        entity_type: &str,
        store: &dyn LocalStore,
        local: &LocalEntity,
        retrier: &Retrier<'_>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let adapter = self.adapter.as_ref();
        let entity_id = local.entity_id.as_str();
        let fetched = retrier
            .call("fetch_item", move || adapter.fetch_item(entity_type, entity_id))
            .await?;
        let Some(item) = fetched else {
            // Gone remotely (replaced by an import); retry as a create.
            store.rebase(entity_id, 0, None, local.revision);
            return Ok(());
        };
        let Some(remote) = self.open_item(entity_type, store, &item, report) else {
            return Ok(());
        };

        let resolution = self.settle(entity_type, store, local, &remote, report);
        let (value, deleted) = match resolution.winner {
            Winner::Remote => {
                if store.apply_remote(&remote, local.revision) {
                    report.applied += 1;
                }
                return Ok(());
            }
            Winner::Local => (local.value.clone(), local.deleted),
            Winner::Merged => (resolution.merged.clone().unwrap_or(Value::Null), false),
        };

        let data = self.crypto.encrypt_json(&value)?;
        let modified_at = match resolution.winner {
            Winner::Merged => now_millis().max(local.modified_at).max(remote.modified_at),
            _ => local.modified_at,
        };
        let resolved = PushItem {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            expected_version: remote.version,
            modified_at,
            deleted,
        };
        let conflict = ConflictRecord::new(entity_type, entity_id, local.version, remote.version);

        let resolved_ref = &resolved;
        let conflict_ref = &conflict;
        let outcome = retrier
            .call("resolve_conflict", move || {
                adapter.resolve_conflict(conflict_ref, resolved_ref.clone())
            })
            .await?;

        match outcome {
            PushOutcome::Success { version, .. } => {
                if resolution.winner == Winner::Merged {
                    store.rebase(entity_id, version, Some(value), local.revision);
                }
                store.mark_synced(entity_id, version, local.revision);
                report.pushed += 1;
            }
            PushOutcome::Conflict { remote_version, .. } => {
                warn!(
                    entity_type,
                    entity_id, remote_version, "entity changed again, deferring to next cycle"
                );
                store.rebase(entity_id, remote.version, None, local.revision);
            }
            PushOutcome::Failure { reason } => {
                self.record_failure(entity_type, entity_id, &reason, report);
            }
        }
        Ok(())
    }

    /// Pushes one dirty entity immediately.
    ///
    /// Returns `None` if the entity is not dirty or a delete needed no
    /// transfer. Conflicts are returned, not resolved; the next cycle
    /// resolves them.
    pub async fn push_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<PushOutcome>> {
        let store = self.store_for(entity_type)?;
        let cancel = self.cancel_token();
        let retrier = Retrier::new(self.adapter.config(), &cancel, &self.retries);
        let adapter = self.adapter.as_ref();

        let _guard = self.locks.acquire(entity_type, entity_id).await;
        let Some(entity) = store.get(entity_id).filter(|e| e.dirty) else {
            return Ok(None);
        };
        let Some(item) = self
            .prepare_push(entity_type, store.as_ref(), &entity, &retrier)
            .await?
        else {
            return Ok(None);
        };

        let item_ref = &item;
        let outcome = retrier
            .call("push", move || adapter.push(item_ref.clone()))
            .await?;
        match &outcome {
            PushOutcome::Success { version, .. } => {
                store.mark_synced(entity_id, *version, entity.revision);
                self.stats.write().items_pushed += 1;
            }
            PushOutcome::Conflict { remote_version, .. } => {
                debug!(entity_type, entity_id, remote_version, "push conflict deferred to next cycle");
            }
            PushOutcome::Failure { reason } => {
                warn!(entity_type, entity_id, ?reason, "push refused");
            }
        }
        Ok(Some(outcome))
    }

    /// Syncs every registered entity type.
    ///
    /// Entity types run concurrently, at most `max_concurrent_requests` at a
    /// time. An authentication failure aborts the whole run; other failures
    /// are collected in the report.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotConnected`] if the backend is unreachable
    /// - [`SyncError::Authentication`] if the adapter has no valid session or
    ///   any cycle hit an authentication failure
    pub async fn sync_all(self: &Arc<Self>) -> SyncResult<SyncReport> {
        let config = self.adapter.config();
        let cancel = self.cancel_token();
        let retrier = Retrier::new(config.clone(), &cancel, &self.retries);
        let adapter = self.adapter.as_ref();

        let health = retrier
            .guarded(async { Ok::<_, SyncError>(adapter.check_health().await) })
            .await?;
        if !health.connected {
            return Err(SyncError::NotConnected);
        }
        if !health.authenticated {
            return Err(SyncError::Authentication("adapter is not authenticated".into()));
        }

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        let mut tasks = JoinSet::new();
        for entity_type in self.entity_types() {
            let coordinator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = coordinator.sync_entity_type(&entity_type).await;
                (entity_type, result)
            });
        }

        let mut report = SyncReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(cycle))) => report.cycles.push(cycle),
                Ok((entity_type, Err(err @ SyncError::Authentication(_)))) => {
                    error!(entity_type = %entity_type, "authentication failed, aborting sync");
                    tasks.abort_all();
                    return Err(err);
                }
                Ok((entity_type, Err(err))) => report.errors.push((entity_type, err)),
                Err(join_err) => report
                    .errors
                    .push((String::new(), SyncError::TaskFailed(join_err.to_string()))),
            }
        }

        report.cycles.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));
        report.errors.sort_by(|a, b| a.0.cmp(&b.0));
        info!(
            cycles = report.cycles.len(),
            errors = report.errors.len(),
            "sync run complete"
        );
        Ok(report)
    }

    /// Exports the backend's full state.
    pub async fn export_snapshot(&self) -> SyncResult<ExportBundle> {
        let cancel = self.cancel_token();
        let retrier = Retrier::new(self.adapter.config(), &cancel, &self.retries);
        let adapter = self.adapter.as_ref();
        let bundle = retrier.call("export_all", move || adapter.export_all()).await?;
        info!(items = bundle.metadata.item_count, "snapshot exported");
        Ok(bundle)
    }

    /// Imports a bundle into the backend after verifying its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Integrity`] without contacting the backend if
    /// the bundle was altered.
    pub async fn import_snapshot(
        &self,
        bundle: ExportBundle,
        options: ImportOptions,
    ) -> SyncResult<ImportReport> {
        bundle.verify()?;

        let cancel = self.cancel_token();
        let retrier = Retrier::new(self.adapter.config(), &cancel, &self.retries);
        let adapter = self.adapter.as_ref();
        let bundle = &bundle;
        let report = retrier
            .call("import_data", move || adapter.import_data(bundle.clone(), options))
            .await?;
        info!(
            imported = report.imported,
            skipped = report.skipped,
            dry_run = options.dry_run,
            "snapshot imported"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KdfParams, SyncKey};
    use crate::local::MemoryLocalStore;
    use crate::memory::MemoryAdapter;
    use crate::config::SyncConfig;
    use serde_json::json;
    use tidesync_protocol::AdapterCredentials;
    use tidesync_store::{StoreConfig, VersionedStore};

    fn crypto() -> Arc<EncryptionService> {
        let key = SyncKey::derive(b"correct horse", b"tidesync-salt", &KdfParams::fast()).unwrap();
        Arc::new(EncryptionService::new(&key))
    }

    fn fast_config() -> SyncConfig {
        SyncConfig::default()
            .with_retry_count(2)
            .with_retry_delay(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(5))
    }

    async fn device(
        store: &Arc<VersionedStore>,
        scope: &str,
        crypto: &Arc<EncryptionService>,
    ) -> (Arc<SyncCoordinator>, Arc<MemoryAdapter>, Arc<MemoryLocalStore>) {
        let adapter = Arc::new(MemoryAdapter::new(Arc::clone(store), scope).with_config(fast_config()));
        adapter
            .authenticate(&AdapterCredentials::new())
            .await
            .unwrap();
        let local = Arc::new(MemoryLocalStore::new());
        let coordinator = Arc::new(SyncCoordinator::new(adapter.clone(), Arc::clone(crypto)));
        coordinator.register("goal", local.clone());
        (coordinator, adapter, local)
    }

    #[tokio::test]
    async fn push_then_pull_on_second_device() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;
        let (b, _, local_b) = device(&backend, "b", &crypto).await;

        local_a.put("g1", json!({"title": "run"}));
        let report = a.sync_entity_type("goal").await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(!local_a.is_dirty("g1"));
        assert_eq!(local_a.get("g1").unwrap().version, 1);

        let report = b.sync_entity_type("goal").await.unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(local_b.value("g1"), Some(json!({"title": "run"})));
        assert_eq!(b.state("goal"), Some(SyncState::Idle));
    }

    #[tokio::test]
    async fn payloads_reach_the_backend_encrypted() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;

        local_a.put("g1", json!({"secret": "plans"}));
        a.sync_entity_type("goal").await.unwrap();

        let stored = backend.item("goal", "g1").unwrap();
        let raw = String::from_utf8_lossy(stored.data.ciphertext()).to_string();
        assert!(!raw.contains("plans"));
        let value: Value = crypto.decrypt_json(&stored.data).unwrap();
        assert_eq!(value, json!({"secret": "plans"}));
    }

    #[tokio::test]
    async fn second_cycle_is_idempotent() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;

        local_a.put("g1", json!(1));
        a.sync_entity_type("goal").await.unwrap();
        let again = a.sync_entity_type("goal").await.unwrap();
        assert_eq!(again.pushed, 0);
        assert_eq!(again.applied, 0);
        assert_eq!(backend.item("goal", "g1").unwrap().version, 1);
    }

    #[tokio::test]
    async fn concurrent_edits_resolve_last_write_wins() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;
        let (b, _, local_b) = device(&backend, "b", &crypto).await;

        local_a.put_at("g1", json!({"title": "from a"}), 100);
        a.sync_entity_type("goal").await.unwrap();
        local_b.put_at("g1", json!({"title": "from b"}), 200);
        let report = b.sync_entity_type("goal").await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.pushed, 1);

        a.sync_entity_type("goal").await.unwrap();
        assert_eq!(local_a.value("g1"), Some(json!({"title": "from b"})));
        assert_eq!(local_b.value("g1"), Some(json!({"title": "from b"})));
        assert!(local_b
            .notices()
            .iter()
            .any(|n| matches!(n, SyncNotice::ConflictResolved { winner: Winner::Local, .. })));
    }

    #[tokio::test]
    async fn deleting_unsynced_entity_skips_transfer() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;

        local_a.put("draft", json!("scratch"));
        local_a.delete("draft");
        let report = a.sync_entity_type("goal").await.unwrap();
        assert_eq!(report.pushed, 0);
        assert!(!local_a.is_dirty("draft"));
        assert!(backend.item("goal", "draft").is_none());
    }

    #[tokio::test]
    async fn delete_propagates_as_tombstone() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;
        let (b, _, local_b) = device(&backend, "b", &crypto).await;

        local_a.put("g1", json!(1));
        a.sync_entity_type("goal").await.unwrap();
        b.sync_entity_type("goal").await.unwrap();

        local_a.delete("g1");
        a.sync_entity_type("goal").await.unwrap();
        assert!(backend.item("goal", "g1").unwrap().deleted);

        b.sync_entity_type("goal").await.unwrap();
        assert_eq!(local_b.value("g1"), None);
        assert!(local_b.get("g1").unwrap().deleted);
    }

    #[tokio::test]
    async fn unknown_entity_type_is_rejected() {
        let backend = Arc::new(VersionedStore::default());
        let (a, _, _) = device(&backend, "a", &crypto()).await;
        assert!(matches!(
            a.sync_entity_type("habit").await,
            Err(SyncError::UnknownEntityType(_))
        ));
    }

    #[tokio::test]
    async fn failed_cycle_backs_off() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let adapter = Arc::new(MemoryAdapter::new(Arc::clone(&backend), "a").with_config(
            fast_config()
                .with_retry_count(0)
                .with_retry_delay(Duration::from_secs(60)),
        ));
        adapter.authenticate(&AdapterCredentials::new()).await.unwrap();
        let coordinator = SyncCoordinator::new(adapter.clone(), crypto);
        coordinator.register("goal", Arc::new(MemoryLocalStore::new()));

        adapter.set_online(false);
        assert!(coordinator.sync_entity_type("goal").await.is_err());
        assert_eq!(coordinator.state("goal"), Some(SyncState::Error));

        adapter.set_online(true);
        assert!(matches!(
            coordinator.sync_entity_type("goal").await,
            Err(SyncError::BackingOff { .. })
        ));
        assert_eq!(coordinator.stats().cycles_failed, 1);
    }

    #[tokio::test]
    async fn push_entity_pushes_immediately() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;

        assert_eq!(a.push_entity("goal", "g1").await.unwrap(), None);
        local_a.put("g1", json!({"n": 1}));
        let outcome = a.push_entity("goal", "g1").await.unwrap().unwrap();
        assert!(outcome.is_success());
        assert!(!local_a.is_dirty("g1"));
        assert_eq!(backend.item("goal", "g1").unwrap().version, 1);
    }

    #[tokio::test]
    async fn quota_pauses_pushes_and_notifies() {
        let backend = Arc::new(VersionedStore::new(StoreConfig::default().with_quota_bytes(80)));
        let crypto = crypto();
        let (a, _, local_a) = device(&backend, "a", &crypto).await;

        local_a.put("g1", json!({"n": "x".repeat(200)}));
        let report = a.sync_entity_type("goal").await.unwrap();
        assert!(report.quota_paused);
        assert_eq!(report.push_failures, 1);
        assert!(local_a.is_dirty("g1"));
        assert!(local_a
            .notices()
            .iter()
            .any(|n| matches!(n, SyncNotice::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn sync_all_requires_authentication() {
        let backend = Arc::new(VersionedStore::default());
        let adapter = Arc::new(MemoryAdapter::new(backend, "a").with_config(fast_config()));
        let coordinator = Arc::new(SyncCoordinator::new(adapter.clone(), crypto()));
        coordinator.register("goal", Arc::new(MemoryLocalStore::new()));

        assert!(matches!(
            coordinator.sync_all().await,
            Err(SyncError::Authentication(_))
        ));

        adapter.set_online(false);
        assert!(matches!(
            coordinator.sync_all().await,
            Err(SyncError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn sync_all_runs_every_entity_type() {
        let backend = Arc::new(VersionedStore::default());
        let crypto = crypto();
        let (a, _, local_goals) = device(&backend, "a", &crypto).await;
        let local_tasks = Arc::new(MemoryLocalStore::new());
        a.register("task", local_tasks.clone());

        local_goals.put("g1", json!(1));
        local_tasks.put("t1", json!(2));
        let report = a.sync_all().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.cycles.len(), 2);
        assert_eq!(report.cycle("task").unwrap().pushed, 1);
        assert_eq!(backend.entity_types(), vec!["goal", "task"]);
    }
}
