//! The backend adapter port.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use async_trait::async_trait;
use tidesync_protocol::{
    AdapterCredentials, AdapterHealth, BatchPushResult, ConflictRecord, ExportBundle,
    ImportOptions, ImportReport, PullResult, PushItem, PushOutcome, Quota, RemoteVersion,
    SyncCursor, SyncItem,
};

/// A pluggable remote backend.
///
/// Adapters only ever carry [`EncryptedSyncData`](tidesync_protocol::EncryptedSyncData);
/// encryption happens before a value reaches them. Every operation may be
/// cancelled by dropping its future.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Opens a session with opaque credentials.
    ///
    /// Fails with [`SyncError::Authentication`](crate::SyncError::Authentication)
    /// for invalid credentials; the coordinator never retries that.
    async fn authenticate(&self, credentials: &AdapterCredentials) -> SyncResult<()>;

    /// Probes connectivity, session and quota. Never fails.
    async fn check_health(&self) -> AdapterHealth;

    /// Writes one item if the backend still holds `expected_version`.
    async fn push(&self, item: PushItem) -> SyncResult<PushOutcome>;

    /// Returns items committed after the cursor, in commit order.
    async fn pull(
        &self,
        entity_type: &str,
        since_timestamp: u64,
        since_version: Option<u64>,
    ) -> SyncResult<PullResult>;

    /// Writes several items; one item's failure never affects the others.
    async fn batch_push(&self, items: Vec<PushItem>) -> SyncResult<BatchPushResult>;

    /// Returns the current remote version of an entity.
    async fn get_remote_version(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<RemoteVersion>>;

    /// Returns the current remote item, including tombstones.
    async fn fetch_item(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<SyncItem>>;

    /// Writes a resolved value over `conflict.remote_version`.
    async fn resolve_conflict(
        &self,
        conflict: &ConflictRecord,
        resolved: PushItem,
    ) -> SyncResult<PushOutcome>;

    /// Returns the backend-side cursor for this adapter's scope.
    async fn get_cursor(&self, entity_type: &str) -> SyncResult<Option<SyncCursor>>;

    /// Merges `cursor` into the backend-side cursor and returns the result.
    async fn update_cursor(&self, cursor: SyncCursor) -> SyncResult<SyncCursor>;

    /// Returns the storage accounting.
    async fn get_quota(&self) -> SyncResult<Quota>;

    /// Exports every item as a checksummed bundle.
    async fn export_all(&self) -> SyncResult<ExportBundle>;

    /// Imports a bundle; fails atomically on checksum mismatch.
    async fn import_data(
        &self,
        bundle: ExportBundle,
        options: ImportOptions,
    ) -> SyncResult<ImportReport>;

    /// Returns the current tunables.
    fn config(&self) -> SyncConfig;

    /// Replaces the tunables after validating them.
    fn set_config(&self, config: SyncConfig) -> SyncResult<()>;
}
