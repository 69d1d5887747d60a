//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tidesync_protocol::messages::{
    endpoints, AuthRequest, AuthResponse, BatchPushRequest, CursorRequest, CursorUpdateRequest,
    Empty, EntityRequest, HealthResponse, ImportRequest, PullRequest, PushRequest,
    RequestEnvelope, ResolveRequest, ResponseEnvelope,
};
use tidesync_protocol::{
    now_millis, BatchPushResult, ExportBundle, ImportReport, PullResult, PushOutcome, Quota,
    RemoteVersion, SyncCursor, SyncItem,
};
use tidesync_store::VersionedStore;
use tracing::{debug, error, info, warn};

/// Account used when authentication is disabled and none is named.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Shared server state.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    validator: Option<TokenValidator>,
    accounts: RwLock<HashMap<String, Arc<VersionedStore>>>,
    sessions: RwLock<HashMap<String, Session>>,
}

/// An open session.
#[derive(Debug, Clone)]
struct Session {
    account: String,
    /// Cursor scope; the device name if the client sent one.
    scope: String,
    expires_at: u64,
}

impl HandlerContext {
    /// Creates a context with no accounts.
    pub fn new(config: ServerConfig) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            validator,
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the token validator, if authentication is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Returns the store of `account`, creating it on first use.
    pub fn account_store(&self, account: &str) -> Arc<VersionedStore> {
        if let Some(store) = self.accounts.read().get(account) {
            return Arc::clone(store);
        }
        let mut accounts = self.accounts.write();
        Arc::clone(accounts.entry(account.to_string()).or_insert_with(|| {
            info!(account, "account created");
            Arc::new(VersionedStore::new(self.config.store_config(account)))
        }))
    }

    /// Replaces the store of `account`.
    pub fn install_account(&self, account: &str, store: VersionedStore) {
        self.accounts
            .write()
            .insert(account.to_string(), Arc::new(store));
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drops sessions that expired before `now`. Returns how many were dropped.
    pub fn expire_sessions(&self, now: u64) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at >= now);
        before - sessions.len()
    }

    fn open_session(&self, account: String, scope: Option<String>, expires_at: u64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let scope = scope.unwrap_or_else(|| id.clone());
        self.sessions.write().insert(
            id.clone(),
            Session {
                account,
                scope,
                expires_at,
            },
        );
        id
    }

    fn session(&self, token: Option<&str>) -> ServerResult<Session> {
        let token =
            token.ok_or_else(|| ServerError::InvalidSession("no session token".into()))?;
        let session = self
            .sessions
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| ServerError::InvalidSession("unknown session".into()))?;
        if session.expires_at < now_millis() {
            self.sessions.write().remove(token);
            return Err(ServerError::InvalidSession("session expired".into()));
        }
        Ok(session)
    }
}

/// Decodes requests, dispatches them and encodes responses.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a handler over a shared context.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one POST body and returns the encoded response.
    ///
    /// Request failures are encoded as error envelopes; only a response that
    /// cannot be encoded at all is returned as `Err`.
    pub fn handle(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let response = match path {
            endpoints::AUTH => self.route(body, |_, req| self.handle_auth(req)),
            endpoints::HEALTH => self.route(body, |token, _: Empty| self.handle_health(token)),
            endpoints::PUSH => self.route(body, |token, req| self.handle_push(token, req)),
            endpoints::BATCH => self.route(body, |token, req| self.handle_batch(token, req)),
            endpoints::PULL => self.route(body, |token, req| self.handle_pull(token, req)),
            endpoints::VERSION => self.route(body, |token, req| self.handle_version(token, req)),
            endpoints::ITEM => self.route(body, |token, req| self.handle_item(token, req)),
            endpoints::RESOLVE => self.route(body, |token, req| self.handle_resolve(token, req)),
            endpoints::CURSOR => self.route(body, |token, req| self.handle_cursor(token, req)),
            endpoints::CURSOR_UPDATE => {
                self.route(body, |token, req| self.handle_cursor_update(token, req))
            }
            endpoints::QUOTA => self.route(body, |token, _: Empty| self.handle_quota(token)),
            endpoints::EXPORT => self.route(body, |token, _: Empty| self.handle_export(token)),
            endpoints::IMPORT => self.route(body, |token, req| self.handle_import(token, req)),
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        };

        match response {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                if err.is_server_error() {
                    error!(path, error = %err, "request failed");
                } else {
                    debug!(path, error = %err, "request rejected");
                }
                ResponseEnvelope::<()>::Err(err.to_remote())
                    .encode()
                    .map_err(|e| e.to_string())
            }
        }
    }

    fn route<Req, Res, F>(&self, body: &[u8], handle: F) -> ServerResult<Vec<u8>>
    where
        Req: DeserializeOwned,
        Res: Serialize,
        F: FnOnce(Option<&str>, Req) -> ServerResult<Res>,
    {
        let request: RequestEnvelope<Req> = RequestEnvelope::decode(body)?;
        let response = handle(request.session.as_deref(), request.body)?;
        ResponseEnvelope::Ok(response)
            .encode()
            .map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Opens a session.
    ///
    /// With authentication enabled the credentials must carry `account` and a
    /// valid `token`. An optional `device` names the cursor scope.
    pub fn handle_auth(&self, request: AuthRequest) -> ServerResult<AuthResponse> {
        let credentials = request.credentials;
        let account = credentials.get("account").map(str::to_string);
        let device = credentials.get("device").map(str::to_string);

        let (account, expires_at) = match self.context.validator() {
            Some(validator) => {
                let account = account.ok_or_else(|| {
                    ServerError::AuthenticationFailed("credentials name no account".into())
                })?;
                let token = credentials.bearer().ok_or_else(|| {
                    ServerError::AuthenticationFailed("credentials carry no token".into())
                })?;
                let expires_at = validator.validate_token(&account, token).map_err(|e| {
                    warn!(account = %account, error = %e, "authentication rejected");
                    e
                })?;
                (account, expires_at)
            }
            None => (
                account.unwrap_or_else(|| DEFAULT_ACCOUNT.to_string()),
                now_millis().saturating_add(self.context.config.token_expiry.as_millis() as u64),
            ),
        };
        if account.is_empty() {
            return Err(ServerError::AuthenticationFailed("empty account".into()));
        }

        self.context.account_store(&account);
        let session = self
            .context
            .open_session(account.clone(), device, expires_at);
        info!(account = %account, "session opened");
        Ok(AuthResponse {
            session,
            account,
            expires_at: Some(expires_at),
        })
    }

    /// Reports session and account health. A missing session is not an error.
    pub fn handle_health(&self, token: Option<&str>) -> ServerResult<HealthResponse> {
        let Ok(session) = self.context.session(token) else {
            return Ok(HealthResponse {
                authenticated: false,
                quota_exceeded: false,
                last_sync_time: None,
            });
        };
        let store = self.context.account_store(&session.account);
        Ok(HealthResponse {
            authenticated: true,
            quota_exceeded: store.quota_exceeded(),
            last_sync_time: store.last_activity(),
        })
    }

    fn store(&self, token: Option<&str>) -> ServerResult<(Session, Arc<VersionedStore>)> {
        let session = self.context.session(token)?;
        let store = self.context.account_store(&session.account);
        Ok((session, store))
    }

    /// Writes one item.
    pub fn handle_push(&self, token: Option<&str>, request: PushRequest) -> ServerResult<PushOutcome> {
        let (_, store) = self.store(token)?;
        Ok(store.push(request.item))
    }

    /// Writes a batch.
    pub fn handle_batch(
        &self,
        token: Option<&str>,
        request: BatchPushRequest,
    ) -> ServerResult<BatchPushResult> {
        let max = self.context.config.max_batch_push;
        if request.items.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} items exceeds the limit of {}",
                request.items.len(),
                max
            )));
        }
        let (_, store) = self.store(token)?;
        Ok(store.batch_push(request.items))
    }

    /// Serves one pull page.
    pub fn handle_pull(&self, token: Option<&str>, request: PullRequest) -> ServerResult<PullResult> {
        if request.entity_type.is_empty() {
            return Err(ServerError::InvalidRequest("empty entity type".into()));
        }
        let (_, store) = self.store(token)?;
        Ok(store.pull(
            &request.entity_type,
            request.since_timestamp,
            request.since_version,
        ))
    }

    /// Returns the current version of one entity.
    pub fn handle_version(
        &self,
        token: Option<&str>,
        request: EntityRequest,
    ) -> ServerResult<Option<RemoteVersion>> {
        let (_, store) = self.store(token)?;
        Ok(store.remote_version(&request.entity_type, &request.entity_id))
    }

    /// Returns the current item, including tombstones.
    pub fn handle_item(
        &self,
        token: Option<&str>,
        request: EntityRequest,
    ) -> ServerResult<Option<SyncItem>> {
        let (_, store) = self.store(token)?;
        Ok(store.item(&request.entity_type, &request.entity_id))
    }

    /// Writes a conflict resolution.
    pub fn handle_resolve(
        &self,
        token: Option<&str>,
        request: ResolveRequest,
    ) -> ServerResult<PushOutcome> {
        let (_, store) = self.store(token)?;
        Ok(store.resolve(&request.conflict, request.resolved))
    }

    /// Returns the session's cursor for one entity type.
    pub fn handle_cursor(
        &self,
        token: Option<&str>,
        request: CursorRequest,
    ) -> ServerResult<Option<SyncCursor>> {
        let (session, store) = self.store(token)?;
        Ok(store.cursor(&session.scope, &request.entity_type))
    }

    /// Merges a cursor into the session's stored cursor.
    pub fn handle_cursor_update(
        &self,
        token: Option<&str>,
        request: CursorUpdateRequest,
    ) -> ServerResult<SyncCursor> {
        let (session, store) = self.store(token)?;
        Ok(store.update_cursor(&session.scope, request.cursor))
    }

    /// Returns the account's storage accounting.
    pub fn handle_quota(&self, token: Option<&str>) -> ServerResult<Quota> {
        let (_, store) = self.store(token)?;
        Ok(store.quota())
    }

    /// Exports the account.
    pub fn handle_export(&self, token: Option<&str>) -> ServerResult<ExportBundle> {
        let (session, store) = self.store(token)?;
        let bundle = store.export_all()?;
        info!(account = %session.account, items = bundle.items.len(), "account exported");
        Ok(bundle)
    }

    /// Imports a bundle into the account.
    pub fn handle_import(
        &self,
        token: Option<&str>,
        request: ImportRequest,
    ) -> ServerResult<ImportReport> {
        let (session, store) = self.store(token)?;
        let report = store.import(&request.bundle, request.options)?;
        info!(
            account = %session.account,
            imported = report.imported,
            skipped = report.skipped,
            "bundle imported"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tidesync_protocol::{AdapterCredentials, EncryptedSyncData, PushItem, IV_SIZE, TAG_SIZE};

    fn handler(config: ServerConfig) -> RequestHandler {
        RequestHandler::new(Arc::new(HandlerContext::new(config)))
    }

    fn item(id: &str, expected_version: u64) -> PushItem {
        PushItem::put(
            "goal",
            id,
            EncryptedSyncData::new([1; IV_SIZE], [2; TAG_SIZE], vec![3, 4, 5]),
            expected_version,
            10,
        )
    }

    fn open(handler: &RequestHandler, credentials: AdapterCredentials) -> String {
        handler
            .handle_auth(AuthRequest { credentials })
            .unwrap()
            .session
    }

    #[test]
    fn auth_disabled_uses_default_account() {
        let handler = handler(ServerConfig::default());
        let response = handler
            .handle_auth(AuthRequest {
                credentials: AdapterCredentials::new(),
            })
            .unwrap();
        assert_eq!(response.account, DEFAULT_ACCOUNT);
        assert!(response.expires_at.is_some());
    }

    #[test]
    fn auth_enabled_requires_valid_token() {
        let handler = handler(ServerConfig::default().with_auth(b"secret".to_vec()));
        let token = handler
            .context
            .validator()
            .unwrap()
            .create_token("alice")
            .unwrap();

        let missing = handler.handle_auth(AuthRequest {
            credentials: AdapterCredentials::token(token.clone()),
        });
        assert!(matches!(missing, Err(ServerError::AuthenticationFailed(_))));

        let forged = handler.handle_auth(AuthRequest {
            credentials: AdapterCredentials::token(token.clone()).with("account", "bob"),
        });
        assert!(forged.is_err());

        let ok = handler
            .handle_auth(AuthRequest {
                credentials: AdapterCredentials::token(token).with("account", "alice"),
            })
            .unwrap();
        assert_eq!(ok.account, "alice");
    }

    #[test]
    fn requests_without_session_are_rejected() {
        let handler = handler(ServerConfig::default());
        let err = handler
            .handle_push(None, PushRequest { item: item("g1", 0) })
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidSession(_)));

        let err = handler
            .handle_quota(Some("not-a-session"))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidSession(_)));
    }

    #[test]
    fn health_without_session_reports_unauthenticated() {
        let handler = handler(ServerConfig::default());
        let health = handler.handle_health(None).unwrap();
        assert!(!health.authenticated);

        let session = open(&handler, AdapterCredentials::new());
        assert!(handler.handle_health(Some(&session)).unwrap().authenticated);
    }

    #[test]
    fn health_reports_refused_pushes() {
        // Each item takes 4 + 2 + 12 + 16 + 3 = 37 bytes.
        let handler = handler(ServerConfig::default().with_quota_bytes(40));
        let session = open(&handler, AdapterCredentials::new());

        let first = handler
            .handle_push(Some(&session), PushRequest { item: item("g1", 0) })
            .unwrap();
        assert!(first.is_success());
        assert!(!handler.handle_health(Some(&session)).unwrap().quota_exceeded);

        let refused = handler
            .handle_push(Some(&session), PushRequest { item: item("g2", 0) })
            .unwrap();
        assert!(!refused.is_success());
        assert!(handler.handle_health(Some(&session)).unwrap().quota_exceeded);
    }

    #[test]
    fn accounts_are_isolated() {
        let handler = handler(ServerConfig::default());
        let alice = open(&handler, AdapterCredentials::new().with("account", "alice"));
        let bob = open(&handler, AdapterCredentials::new().with("account", "bob"));

        let outcome = handler
            .handle_push(Some(&alice), PushRequest { item: item("g1", 0) })
            .unwrap();
        assert!(outcome.is_success());

        let request = PullRequest {
            entity_type: "goal".into(),
            since_timestamp: 0,
            since_version: None,
        };
        assert_eq!(handler.handle_pull(Some(&alice), request.clone()).unwrap().items.len(), 1);
        assert!(handler.handle_pull(Some(&bob), request).unwrap().items.is_empty());
    }

    #[test]
    fn cursors_are_scoped_by_device() {
        let handler = handler(ServerConfig::default());
        let phone = open(&handler, AdapterCredentials::new().with("device", "phone"));
        let laptop = open(&handler, AdapterCredentials::new().with("device", "laptop"));

        let cursor = SyncCursor::initial("goal", 1).advance(50, 3);
        handler
            .handle_cursor_update(Some(&phone), CursorUpdateRequest { cursor: cursor.clone() })
            .unwrap();

        let request = CursorRequest {
            entity_type: "goal".into(),
        };
        assert_eq!(
            handler.handle_cursor(Some(&phone), request.clone()).unwrap(),
            Some(cursor)
        );
        assert_eq!(handler.handle_cursor(Some(&laptop), request).unwrap(), None);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let handler = handler(ServerConfig::default().with_max_batch_push(2));
        let session = open(&handler, AdapterCredentials::new());
        let items = vec![item("a", 0), item("b", 0), item("c", 0)];

        let err = handler
            .handle_batch(Some(&session), BatchPushRequest { items })
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let handler = handler(ServerConfig::default().with_token_expiry(Duration::from_secs(60)));
        let session = open(&handler, AdapterCredentials::new());
        assert_eq!(handler.context.session_count(), 1);

        assert_eq!(handler.context.expire_sessions(now_millis() + 120_000), 1);
        assert!(handler.handle_quota(Some(&session)).is_err());
    }

    #[test]
    fn unknown_endpoint_is_encoded_as_not_found() {
        let handler = handler(ServerConfig::default());
        let bytes = handler.handle("/sync/nope", &[]).unwrap();
        let response: ResponseEnvelope<()> = ResponseEnvelope::decode(&bytes).unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(
            err.kind,
            tidesync_protocol::messages::RemoteErrorKind::NotFound
        );
    }

    #[test]
    fn garbage_body_is_invalid_request() {
        let handler = handler(ServerConfig::default());
        let bytes = handler.handle(endpoints::PUSH, b"not cbor").unwrap();
        let response: ResponseEnvelope<PushOutcome> = ResponseEnvelope::decode(&bytes).unwrap();
        let err = response.into_result().unwrap_err();
        assert_eq!(
            err.kind,
            tidesync_protocol::messages::RemoteErrorKind::InvalidRequest
        );
    }
}
