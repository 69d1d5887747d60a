//! Account tokens for the sync server.
//!
//! Tokens are HMAC-SHA256 signatures over the account name and an expiry
//! timestamp:
//!
//! ```text
//! v1.<expires_at millis>.<hex signature>
//! ```
//!
//! The account is not embedded; clients send it next to the token.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tidesync_protocol::now_millis;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "v1";

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a configuration with a 24 hour token lifetime.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token lifetime.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks account tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("token_expiry", &self.config.token_expiry)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Creates a validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `account`, valid from now.
    pub fn create_token(&self, account: &str) -> ServerResult<String> {
        self.create_token_at(account, now_millis())
    }

    /// Issues a token for `account` as if issued at `issued_at` (Unix millis).
    pub fn create_token_at(&self, account: &str, issued_at: u64) -> ServerResult<String> {
        let expires_at =
            issued_at.saturating_add(self.config.token_expiry.as_millis() as u64);
        let signature = self.mac(account, expires_at)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}.{}",
            TOKEN_PREFIX,
            expires_at,
            hex::encode(signature)
        ))
    }

    /// Checks a token for `account` and returns its expiry.
    pub fn validate_token(&self, account: &str, token: &str) -> ServerResult<u64> {
        let mut parts = token.splitn(3, '.');
        let (Some(prefix), Some(expires), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::AuthenticationFailed("malformed token".into()));
        };
        if prefix != TOKEN_PREFIX {
            return Err(ServerError::AuthenticationFailed(format!(
                "unsupported token version '{}'",
                prefix
            )));
        }
        let expires_at: u64 = expires
            .parse()
            .map_err(|_| ServerError::AuthenticationFailed("malformed token expiry".into()))?;
        let signature = hex::decode(signature)
            .map_err(|_| ServerError::AuthenticationFailed("malformed token signature".into()))?;

        self.mac(account, expires_at)?
            .verify_slice(&signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        if now_millis() > expires_at {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }
        Ok(expires_at)
    }

    fn mac(&self, account: &str, expires_at: u64) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("invalid HMAC key: {}", e)))?;
        mac.update(account.as_bytes());
        mac.update(&[0]);
        mac.update(&expires_at.to_be_bytes());
        Ok(mac)
    }
}
