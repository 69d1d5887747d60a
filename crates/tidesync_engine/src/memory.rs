//! In-process adapter over a shared [`VersionedStore`].

use crate::adapter::SyncAdapter;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tidesync_protocol::{
    AdapterCredentials, AdapterHealth, BatchPushResult, ConflictRecord, ExportBundle,
    ImportOptions, ImportReport, PullResult, PushItem, PushOutcome, Quota, RemoteVersion,
    SyncCursor, SyncItem,
};
use tidesync_store::VersionedStore;
use tracing::debug;

/// An adapter backed by an in-process [`VersionedStore`].
///
/// Several adapters over one store behave like several devices talking to
/// one backend; each adapter keeps its cursors under its own scope.
///
/// For tests the adapter can be taken offline ([`set_online`](Self::set_online))
/// or made to fail its next calls with retryable network errors
/// ([`fail_next`](Self::fail_next)).
#[derive(Debug)]
pub struct MemoryAdapter {
    store: Arc<VersionedStore>,
    scope: String,
    expected_token: Option<String>,
    authenticated: AtomicBool,
    online: AtomicBool,
    pending_failures: AtomicU32,
    config: RwLock<SyncConfig>,
}

impl MemoryAdapter {
    /// Creates an adapter over `store` using `scope` for its cursors.
    pub fn new(store: Arc<VersionedStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
            expected_token: None,
            authenticated: AtomicBool::new(false),
            online: AtomicBool::new(true),
            pending_failures: AtomicU32::new(0),
            config: RwLock::new(SyncConfig::default()),
        }
    }

    /// Requires `authenticate` to present this bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.expected_token = Some(token.into());
        self
    }

    /// Sets the initial tunables.
    #[must_use]
    pub fn with_config(self, config: SyncConfig) -> Self {
        *self.config.write() = config;
        self
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    /// Returns the cursor scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Simulates connectivity loss or recovery.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Makes the next `count` calls fail with a retryable network error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Drops the session.
    pub fn sign_out(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    fn reachable(&self, operation: &str) -> SyncResult<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("backend unreachable"));
        }
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(operation, "injected network failure");
            return Err(SyncError::network_retryable(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }

    fn gate(&self, operation: &str) -> SyncResult<()> {
        self.reachable(operation)?;
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(SyncError::Authentication("not authenticated".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncAdapter for MemoryAdapter {
    async fn authenticate(&self, credentials: &AdapterCredentials) -> SyncResult<()> {
        self.reachable("authenticate")?;
        if let Some(expected) = &self.expected_token {
            if credentials.bearer() != Some(expected.as_str()) {
                self.authenticated.store(false, Ordering::SeqCst);
                return Err(SyncError::Authentication("invalid token".into()));
            }
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn check_health(&self) -> AdapterHealth {
        if !self.online.load(Ordering::SeqCst) {
            return AdapterHealth::disconnected();
        }
        AdapterHealth {
            connected: true,
            authenticated: self.authenticated.load(Ordering::SeqCst),
            quota_exceeded: self.store.quota_exceeded(),
            last_sync_time: self.store.last_activity(),
        }
    }

    async fn push(&self, item: PushItem) -> SyncResult<PushOutcome> {
        self.gate("push")?;
        Ok(self.store.push(item))
    }

    async fn pull(
        &self,
        entity_type: &str,
        since_timestamp: u64,
        since_version: Option<u64>,
    ) -> SyncResult<PullResult> {
        self.gate("pull")?;
        Ok(self.store.pull(entity_type, since_timestamp, since_version))
    }

    async fn batch_push(&self, items: Vec<PushItem>) -> SyncResult<BatchPushResult> {
        self.gate("batch_push")?;
        Ok(self.store.batch_push(items))
    }

    async fn get_remote_version(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<RemoteVersion>> {
        self.gate("get_remote_version")?;
        Ok(self.store.remote_version(entity_type, entity_id))
    }

    async fn fetch_item(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<SyncItem>> {
        self.gate("fetch_item")?;
        Ok(self.store.item(entity_type, entity_id))
    }

    async fn resolve_conflict(
        &self,
        conflict: &ConflictRecord,
        resolved: PushItem,
    ) -> SyncResult<PushOutcome> {
        self.gate("resolve_conflict")?;
        Ok(self.store.resolve(conflict, resolved))
    }

    async fn get_cursor(&self, entity_type: &str) -> SyncResult<Option<SyncCursor>> {
        self.gate("get_cursor")?;
        Ok(self.store.cursor(&self.scope, entity_type))
    }

    async fn update_cursor(&self, cursor: SyncCursor) -> SyncResult<SyncCursor> {
        self.gate("update_cursor")?;
        Ok(self.store.update_cursor(&self.scope, cursor))
    }

    async fn get_quota(&self) -> SyncResult<Quota> {
        self.gate("get_quota")?;
        Ok(self.store.quota())
    }

    async fn export_all(&self) -> SyncResult<ExportBundle> {
        self.gate("export_all")?;
        Ok(self.store.export_all()?)
    }

    async fn import_data(
        &self,
        bundle: ExportBundle,
        options: ImportOptions,
    ) -> SyncResult<ImportReport> {
        self.gate("import_data")?;
        Ok(self.store.import(&bundle, options)?)
    }

    fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    fn set_config(&self, config: SyncConfig) -> SyncResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }
}
