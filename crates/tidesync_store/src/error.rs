//! Error types for the versioned store.

use std::io;
use thiserror::Error;
use tidesync_protocol::ProtocolError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// Per-item refusals (conflicts, quota) are not errors; they are reported as
/// [`PushOutcome`](tidesync_protocol::PushOutcome) values.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An import bundle failed checksum validation. Nothing was applied.
    #[error("bundle checksum mismatch: expected {expected}, computed {actual}")]
    Integrity {
        /// Checksum recorded in the bundle.
        expected: String,
        /// Checksum computed over the items.
        actual: String,
    },

    /// The bundle format version is not supported.
    #[error("unsupported bundle format version {0}")]
    UnsupportedBundleVersion(u32),

    /// The bundle is structurally invalid (duplicate keys, empty IDs).
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// Snapshot file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<ProtocolError> for StoreError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ChecksumMismatch { expected, actual } => {
                StoreError::Integrity { expected, actual }
            }
            ProtocolError::UnsupportedBundleVersion(version) => {
                StoreError::UnsupportedBundleVersion(version)
            }
            other => StoreError::Codec(other.to_string()),
        }
    }
}
