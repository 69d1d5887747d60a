//! Error types for the sync server.

use thiserror::Error;
use tidesync_protocol::messages::{RemoteError, RemoteErrorKind};
use tidesync_protocol::ProtocolError;
use tidesync_store::StoreError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Missing, unknown or expired session.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// Unknown endpoint.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Import checksum mismatch.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::InvalidSession(_)
                | ServerError::UnknownEndpoint(_)
                | ServerError::Integrity(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Storage(_) | ServerError::Internal(_) | ServerError::Io(_)
        )
    }

    /// Returns the error category sent to clients.
    pub fn remote_kind(&self) -> RemoteErrorKind {
        match self {
            ServerError::InvalidRequest(_) => RemoteErrorKind::InvalidRequest,
            ServerError::AuthenticationFailed(_) | ServerError::InvalidSession(_) => {
                RemoteErrorKind::Unauthenticated
            }
            ServerError::UnknownEndpoint(_) => RemoteErrorKind::NotFound,
            ServerError::Integrity(_) => RemoteErrorKind::Integrity,
            ServerError::Storage(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                RemoteErrorKind::Internal
            }
        }
    }

    /// Converts to the wire error body.
    pub fn to_remote(&self) -> RemoteError {
        RemoteError::new(self.remote_kind(), self.to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Integrity { .. } => ServerError::Integrity(err.to_string()),
            StoreError::UnsupportedBundleVersion(_) | StoreError::InvalidBundle(_) => {
                ServerError::InvalidRequest(err.to_string())
            }
            StoreError::Io(_) | StoreError::Codec(_) => ServerError::Storage(err.to_string()),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}
