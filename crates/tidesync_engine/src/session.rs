//! Per-account sync sessions.

use crate::adapter::SyncAdapter;
use crate::config::CoordinatorOptions;
use crate::coordinator::{SyncCoordinator, SyncReport};
use crate::crypto::{EncryptionService, KdfParams, SyncKey};
use crate::cursor::CursorStore;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use crate::resolver::ConflictResolver;
use std::sync::Arc;
use tidesync_protocol::AdapterCredentials;
use tracing::info;
use zeroize::Zeroizing;

/// An authenticated account with its own coordinator.
///
/// Sessions are built explicitly and own everything they use; two sessions
/// for different accounts share nothing.
#[derive(Debug)]
pub struct SyncSession {
    account: String,
    coordinator: Arc<SyncCoordinator>,
}

impl SyncSession {
    /// Starts building a session for `account` over `adapter`.
    pub fn builder(account: impl Into<String>, adapter: Arc<dyn SyncAdapter>) -> SyncSessionBuilder {
        SyncSessionBuilder {
            account: account.into(),
            adapter,
            password: None,
            salt: Vec::new(),
            kdf: KdfParams::default(),
            key: None,
            credentials: AdapterCredentials::new(),
            cursors: None,
            resolver: ConflictResolver::new(),
            options: CoordinatorOptions::default(),
        }
    }

    /// Returns the account name.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Registers the local store of an entity type.
    pub fn register(&self, entity_type: impl Into<String>, store: Arc<dyn LocalStore>) {
        self.coordinator.register(entity_type, store);
    }

    /// Syncs every registered entity type.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.coordinator.sync_all().await
    }

    /// Cancels running cycles.
    pub fn cancel(&self) {
        self.coordinator.cancel();
    }
}

/// Builder for [`SyncSession`].
pub struct SyncSessionBuilder {
    account: String,
    adapter: Arc<dyn SyncAdapter>,
    password: Option<Zeroizing<String>>,
    salt: Vec<u8>,
    kdf: KdfParams,
    key: Option<SyncKey>,
    credentials: AdapterCredentials,
    cursors: Option<Arc<dyn CursorStore>>,
    resolver: ConflictResolver,
    options: CoordinatorOptions,
}

impl SyncSessionBuilder {
    /// Derives the payload key from a password and salt.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>, salt: impl Into<Vec<u8>>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self.salt = salt.into();
        self
    }

    /// Sets the key-derivation cost.
    #[must_use]
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    /// Uses an already derived key instead of a password.
    #[must_use]
    pub fn with_key(mut self, key: SyncKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Sets the credentials passed to `authenticate`.
    #[must_use]
    pub fn with_credentials(mut self, credentials: AdapterCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Persists cursors in `cursors`.
    #[must_use]
    pub fn with_cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Sets the conflict policy.
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

    /// Derives the key, authenticates and builds the session.
    ///
    /// Key derivation runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Config`] if neither a key nor a password was given
    /// - [`SyncError::KeyDerivation`] if the salt or KDF parameters are invalid
    /// - [`SyncError::Authentication`] if the adapter rejects the credentials
    pub async fn build(self) -> SyncResult<SyncSession> {
        let key = match (self.key, self.password) {
            (Some(key), _) => key,
            (None, Some(password)) => {
                let salt = self.salt;
                let params = self.kdf;
                tokio::task::spawn_blocking(move || {
                    SyncKey::derive(password.as_bytes(), &salt, &params)
                })
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))??
            }
            (None, None) => {
                return Err(SyncError::Config(
                    "a key or a password is required".into(),
                ))
            }
        };

        self.adapter.authenticate(&self.credentials).await?;

        let mut coordinator =
            SyncCoordinator::new(Arc::clone(&self.adapter), Arc::new(EncryptionService::new(&key)))
                .with_resolver(self.resolver)
                .with_options(self.options);
        if let Some(cursors) = self.cursors {
            coordinator = coordinator.with_cursor_store(cursors);
        }

        info!(account = %self.account, "sync session started");
        Ok(SyncSession {
            account: self.account,
            coordinator: Arc::new(coordinator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::memory::MemoryAdapter;
    use serde_json::json;
    use tidesync_store::VersionedStore;

    fn adapter(backend: &Arc<VersionedStore>, scope: &str) -> Arc<MemoryAdapter> {
        Arc::new(MemoryAdapter::new(Arc::clone(backend), scope).with_token("secret"))
    }

    #[tokio::test]
    async fn password_sessions_share_data() {
        let backend = Arc::new(VersionedStore::default());
        let credentials = AdapterCredentials::token("secret");

        let first = SyncSession::builder("alice", adapter(&backend, "phone"))
            .with_password("hunter22", b"alice-salt".to_vec())
            .with_kdf_params(KdfParams::fast())
            .with_credentials(credentials.clone())
            .build()
            .await
            .unwrap();
        let second = SyncSession::builder("alice", adapter(&backend, "laptop"))
            .with_password("hunter22", b"alice-salt".to_vec())
            .with_kdf_params(KdfParams::fast())
            .with_credentials(credentials)
            .build()
            .await
            .unwrap();
        assert_eq!(first.account(), "alice");

        let phone = Arc::new(MemoryLocalStore::new());
        let laptop = Arc::new(MemoryLocalStore::new());
        first.register("goal", phone.clone());
        second.register("goal", laptop.clone());

        phone.put("g1", json!({"title": "read"}));
        assert!(first.sync().await.unwrap().is_success());
        assert!(second.sync().await.unwrap().is_success());
        assert_eq!(laptop.value("g1"), Some(json!({"title": "read"})));
    }

    #[tokio::test]
    async fn missing_key_material_is_a_config_error() {
        let backend = Arc::new(VersionedStore::default());
        let err = SyncSession::builder("bob", adapter(&backend, "a"))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn rejected_credentials_fail_the_build() {
        let backend = Arc::new(VersionedStore::default());
        let err = SyncSession::builder("bob", adapter(&backend, "a"))
            .with_key(SyncKey::generate())
            .with_credentials(AdapterCredentials::token("wrong"))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Authentication(_)));
    }

    #[tokio::test]
    async fn short_salt_is_rejected() {
        let backend = Arc::new(VersionedStore::default());
        let err = SyncSession::builder("bob", adapter(&backend, "a"))
            .with_password("pw", b"salt".to_vec())
            .with_kdf_params(KdfParams::fast())
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::KeyDerivation(_)));
    }
}
