//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use std::path::Path;
use std::sync::Arc;
use tidesync_protocol::ExportBundle;
use tidesync_store::{load_snapshot, save_snapshot, VersionedStore};
use tracing::info;

/// The sync server.
///
/// Holds one [`VersionedStore`] per account and answers the CBOR
/// request/response protocol in [`tidesync_protocol::messages`]. It stores
/// only ciphertext and never needs a payload key.
///
/// Transport is left to the embedder: pass each POST path and body to
/// [`SyncServer::handle_post`] and send back the returned bytes.
///
/// # Example
///
/// ```
/// use tidesync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default().with_max_pull_batch(50));
/// assert_eq!(server.session_count(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server with no accounts.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles one POST request.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.handler.handle(path, body)
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Issues a token for `account`.
    ///
    /// # Errors
    ///
    /// Fails if authentication is disabled.
    pub fn create_token(&self, account: &str) -> ServerResult<String> {
        self.context
            .validator()
            .ok_or_else(|| ServerError::InvalidRequest("authentication is disabled".into()))?
            .create_token(account)
    }

    /// Returns the store of `account`, creating it on first use.
    pub fn account_store(&self, account: &str) -> Arc<VersionedStore> {
        self.context.account_store(account)
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.context.account_count()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }

    /// Drops sessions that expired before `now` (Unix millis).
    pub fn expire_sessions(&self, now: u64) -> usize {
        self.context.expire_sessions(now)
    }

    /// Writes an account snapshot to `path`.
    pub fn snapshot_account(&self, account: &str, path: &Path) -> ServerResult<ExportBundle> {
        let bundle = save_snapshot(&self.context.account_store(account), path)?;
        info!(account, path = %path.display(), items = bundle.items.len(), "account snapshot written");
        Ok(bundle)
    }

    /// Replaces an account with the snapshot at `path`.
    pub fn restore_account(&self, account: &str, path: &Path) -> ServerResult<()> {
        let store = load_snapshot(path, self.context.config.store_config(account))?;
        info!(account, path = %path.display(), items = store.len(), "account restored");
        self.context.install_account(account, store);
        Ok(())
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.context.config)
            .field("accounts", &self.context.account_count())
            .finish()
    }
}
