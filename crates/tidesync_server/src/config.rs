//! Server configuration.

use std::time::Duration;
use tidesync_store::StoreConfig;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum items per pull page.
    pub max_pull_batch: usize,
    /// Maximum items per batch push request.
    pub max_batch_push: usize,
    /// Per-account storage quota in bytes (`None` = unlimited).
    pub quota_bytes: Option<u64>,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued tokens and of sessions.
    pub token_expiry: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_pull_batch: 100,
            max_batch_push: 100,
            quota_bytes: None,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl ServerConfig {
    /// Sets the maximum pull page size.
    pub fn with_max_pull_batch(mut self, size: usize) -> Self {
        self.max_pull_batch = size.max(1);
        self
    }

    /// Sets the maximum batch push size.
    pub fn with_max_batch_push(mut self, size: usize) -> Self {
        self.max_batch_push = size.max(1);
        self
    }

    /// Sets the per-account quota.
    pub fn with_quota_bytes(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token and session lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Store configuration for one account.
    pub fn store_config(&self, account: &str) -> StoreConfig {
        let mut config = StoreConfig::default()
            .with_page_size(self.max_pull_batch)
            .with_name(account);
        if let Some(quota) = self.quota_bytes {
            config = config.with_quota_bytes(quota);
        }
        config
    }
}
