//! HTTP adapter.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any client
//! library (or an in-process loopback) can carry the requests. Bodies are
//! CBOR [`RequestEnvelope`]s and [`ResponseEnvelope`]s posted to the
//! [`endpoints`] paths.

use crate::adapter::SyncAdapter;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tidesync_protocol::messages::{
    endpoints, AuthRequest, AuthResponse, BatchPushRequest, CursorRequest, CursorUpdateRequest,
    Empty, EntityRequest, HealthResponse, ImportRequest, PullRequest, PushRequest, RemoteError,
    RemoteErrorKind, RequestEnvelope, ResolveRequest, ResponseEnvelope,
};
use tidesync_protocol::{
    AdapterCredentials, AdapterHealth, BatchPushResult, ConflictRecord, ExportBundle,
    ImportOptions, ImportReport, PullResult, PushItem, PushOutcome, Quota, RemoteVersion,
    SyncCursor, SyncItem,
};
use tracing::{debug, warn};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

type VersionKey = (String, String);

/// Adapter that talks to a remote sync server over [`HttpClient`].
pub struct HttpAdapter<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    client: C,
    session: RwLock<Option<AuthResponse>>,
    connected: AtomicBool,
    config: RwLock<SyncConfig>,
    version_cache: Mutex<HashMap<VersionKey, (Instant, Option<RemoteVersion>)>>,
}

impl<C: HttpClient> fmt::Debug for HttpAdapter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAdapter")
            .field("base_url", &self.base_url)
            .field("has_session", &self.session.read().is_some())
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C: HttpClient> HttpAdapter<C> {
    /// Creates a new HTTP adapter.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            session: RwLock::new(None),
            connected: AtomicBool::new(true),
            config: RwLock::new(SyncConfig::default()),
            version_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the initial tunables.
    #[must_use]
    pub fn with_config(self, config: SyncConfig) -> Self {
        *self.config.write() = config;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the account bound to the current session.
    pub fn account(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.account.clone())
    }

    /// Returns true if the last request reached the server.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn call<Req, Res>(&self, endpoint: &str, body: Req) -> SyncResult<Res>
    where
        Req: Serialize + Send,
        Res: DeserializeOwned + Send,
    {
        // An unhealthy client is treated like a dropped connection.
        if !self.client.is_healthy() {
            return Err(SyncError::network_retryable("http client unavailable"));
        }

        let session = self.session.read().as_ref().map(|s| s.session.clone());
        let request = RequestEnvelope::new(session, body)
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {}", e)))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let response = match self.client.post(&url, request).await {
            Ok(response) => response,
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(SyncError::network_retryable(e));
            }
        };
        self.connected.store(true, Ordering::SeqCst);

        let envelope: ResponseEnvelope<Res> = ResponseEnvelope::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {}", e)))?;
        envelope.into_result().map_err(|err| {
            debug!(endpoint, kind = ?err.kind, message = %err.message, "remote error");
            if err.kind == RemoteErrorKind::Unauthenticated {
                *self.session.write() = None;
            }
            remote_error(err)
        })
    }

    fn cached_version(&self, key: &VersionKey) -> Option<Option<RemoteVersion>> {
        let config = self.config.read().clone();
        if !config.enable_cache {
            return None;
        }
        let mut cache = self.version_cache.lock();
        match cache.get(key) {
            Some((at, version)) if at.elapsed() < config.cache_expiry => Some(*version),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn invalidate<'a>(&self, keys: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let mut cache = self.version_cache.lock();
        for (entity_type, entity_id) in keys {
            cache.remove(&(entity_type.to_string(), entity_id.to_string()));
        }
    }
}

fn remote_error(err: RemoteError) -> SyncError {
    match err.kind {
        RemoteErrorKind::Unauthenticated => SyncError::Authentication(err.message),
        RemoteErrorKind::InvalidRequest | RemoteErrorKind::NotFound => {
            SyncError::Protocol(err.message)
        }
        RemoteErrorKind::Integrity => SyncError::Integrity(err.message),
        RemoteErrorKind::Internal => SyncError::network_retryable(err.message),
    }
}

#[async_trait]
impl<C: HttpClient> SyncAdapter for HttpAdapter<C> {
    async fn authenticate(&self, credentials: &AdapterCredentials) -> SyncResult<()> {
        *self.session.write() = None;
        let response: AuthResponse = self
            .call(
                endpoints::AUTH,
                AuthRequest {
                    credentials: credentials.clone(),
                },
            )
            .await?;
        debug!(account = %response.account, "session opened");
        *self.session.write() = Some(response);
        self.version_cache.lock().clear();
        Ok(())
    }

    async fn check_health(&self) -> AdapterHealth {
        match self.call::<_, HealthResponse>(endpoints::HEALTH, Empty {}).await {
            Ok(health) => AdapterHealth {
                connected: true,
                authenticated: health.authenticated && self.session.read().is_some(),
                quota_exceeded: health.quota_exceeded,
                last_sync_time: health.last_sync_time,
            },
            Err(SyncError::Authentication(_)) => AdapterHealth {
                connected: true,
                ..AdapterHealth::default()
            },
            Err(e) => {
                warn!(error = %e, "health check failed");
                AdapterHealth::disconnected()
            }
        }
    }

    async fn push(&self, item: PushItem) -> SyncResult<PushOutcome> {
        self.invalidate([item.key()]);
        self.call(endpoints::PUSH, PushRequest { item }).await
    }

    async fn pull(
        &self,
        entity_type: &str,
        since_timestamp: u64,
        since_version: Option<u64>,
    ) -> SyncResult<PullResult> {
        self.call(
            endpoints::PULL,
            PullRequest {
                entity_type: entity_type.to_string(),
                since_timestamp,
                since_version,
            },
        )
        .await
    }

    async fn batch_push(&self, items: Vec<PushItem>) -> SyncResult<BatchPushResult> {
        self.invalidate(items.iter().map(PushItem::key));
        self.call(endpoints::BATCH, BatchPushRequest { items }).await
    }

    async fn get_remote_version(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> SyncResult<Option<RemoteVersion>> {
        let key = (entity_type.to_string(), entity_id.to_string());
        if let Some(cached) = self.cached_version(&key) {
            return Ok(cached);
        }

        let version: Option<RemoteVersion> = self
            .call(
                endpoints::VERSION,
                EntityRequest {
                    entity_type: key.0.clone(),
                    entity_id: key.1.clone(),
                },
            )
            .await?;

        if self.config.read().enable_cache {
            self.version_cache.lock().insert(key, (Instant::now(), version));
        }
        Ok(version)
    }

    async fn fetch_item(&self, entity_type: &str, entity_id: &str) -> SyncResult<Option<SyncItem>> {
        self.call(
            endpoints::ITEM,
            EntityRequest {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            },
        )
        .await
    }

    async fn resolve_conflict(
        &self,
        conflict: &ConflictRecord,
        resolved: PushItem,
    ) -> SyncResult<PushOutcome> {
        self.invalidate([resolved.key()]);
        self.call(
            endpoints::RESOLVE,
            ResolveRequest {
                conflict: conflict.clone(),
                resolved,
            },
        )
        .await
    }

    async fn get_cursor(&self, entity_type: &str) -> SyncResult<Option<SyncCursor>> {
        self.call(
            endpoints::CURSOR,
            CursorRequest {
                entity_type: entity_type.to_string(),
            },
        )
        .await
    }

    async fn update_cursor(&self, cursor: SyncCursor) -> SyncResult<SyncCursor> {
        self.call(endpoints::CURSOR_UPDATE, CursorUpdateRequest { cursor })
            .await
    }

    async fn get_quota(&self) -> SyncResult<Quota> {
        self.call(endpoints::QUOTA, Empty {}).await
    }

    async fn export_all(&self) -> SyncResult<ExportBundle> {
        self.call(endpoints::EXPORT, Empty {}).await
    }

    async fn import_data(
        &self,
        bundle: ExportBundle,
        options: ImportOptions,
    ) -> SyncResult<ImportReport> {
        let report = self
            .call(endpoints::IMPORT, ImportRequest { bundle, options })
            .await?;
        self.version_cache.lock().clear();
        Ok(report)
    }

    fn config(&self) -> SyncConfig {
        self.config.read().clone()
    }

    fn set_config(&self, config: SyncConfig) -> SyncResult<()> {
        config.validate()?;
        if !config.enable_cache {
            self.version_cache.lock().clear();
        }
        *self.config.write() = config;
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates the network going down or coming back.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.is_healthy() {
            return Err("connection refused".into());
        }
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
