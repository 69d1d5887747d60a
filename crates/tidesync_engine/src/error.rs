//! Error types for the sync engine.

use thiserror::Error;
use tidesync_protocol::ProtocolError;
use tidesync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials invalid or expired. Never retried.
    Authentication,
    /// Transport failure or timeout. Retried with backoff.
    Network,
    /// Backend over quota.
    QuotaExceeded,
    /// Import checksum mismatch.
    Integrity,
    /// Payload failed to decrypt.
    Decryption,
    /// Cycle cancelled by the caller.
    Cancelled,
    /// Coordinator state or registration problem.
    State,
    /// Local store failure.
    Local,
    /// Invalid configuration or key material.
    Config,
    /// Malformed message or unexpected response.
    Protocol,
}

/// Errors that can occur during sync operations.
///
/// Push conflicts are not errors; they are reported as
/// [`PushOutcome::Conflict`](tidesync_protocol::PushOutcome::Conflict).
#[derive(Error, Debug)]
pub enum SyncError {
    /// Authentication failed or the session expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// An adapter call did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The backend refused a write because of its quota.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// An import bundle failed checksum validation.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A payload could not be decrypted (malformed, tampered or wrong key).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// A payload could not be encrypted or serialized.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The local store failed.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The entity type failed recently and is waiting out its retry delay.
    #[error("{entity_type} is backing off for another {retry_in_ms} ms")]
    BackingOff {
        /// Entity type.
        entity_type: String,
        /// Remaining delay in milliseconds.
        retry_in_ms: u64,
    },

    /// The backend is unreachable.
    #[error("not connected to backend")]
    NotConnected,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No local store is registered for the entity type.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A background task panicked or was aborted.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Authentication(_) => ErrorKind::Authentication,
            SyncError::Network { .. } | SyncError::Timeout | SyncError::NotConnected => {
                ErrorKind::Network
            }
            SyncError::QuotaExceeded => ErrorKind::QuotaExceeded,
            SyncError::Integrity(_) => ErrorKind::Integrity,
            SyncError::Decryption(_) => ErrorKind::Decryption,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::InvalidStateTransition { .. }
            | SyncError::BackingOff { .. }
            | SyncError::UnknownEntityType(_)
            | SyncError::TaskFailed(_) => ErrorKind::State,
            SyncError::LocalStore(_) => ErrorKind::Local,
            SyncError::Encryption(_) | SyncError::KeyDerivation(_) | SyncError::Config(_) => {
                ErrorKind::Config
            }
            SyncError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Integrity { .. } => SyncError::Integrity(err.to_string()),
            StoreError::UnsupportedBundleVersion(_) | StoreError::InvalidBundle(_) => {
                SyncError::Protocol(err.to_string())
            }
            StoreError::Io(_) | StoreError::Codec(_) => SyncError::LocalStore(err.to_string()),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ChecksumMismatch { .. } => SyncError::Integrity(err.to_string()),
            _ => SyncError::Protocol(err.to_string()),
        }
    }
}
