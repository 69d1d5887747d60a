//! Request and response bodies for network transports.
//!
//! Every request is a [`RequestEnvelope`] posted to one of the
//! [`endpoints`]; every response is a [`ResponseEnvelope`]. Both are CBOR
//! encoded with [`to_cbor`](crate::to_cbor). Payloads inside are the same
//! types the adapter port uses, so no plaintext can appear on the wire.

use crate::bundle::{ExportBundle, ImportOptions};
use crate::codec::{from_cbor, to_cbor};
use crate::conflict::ConflictRecord;
use crate::credentials::AdapterCredentials;
use crate::cursor::SyncCursor;
use crate::error::ProtocolResult;
use crate::item::PushItem;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Endpoint paths.
pub mod endpoints {
    /// Authenticate and open a session.
    pub const AUTH: &str = "/sync/auth";
    /// Health probe.
    pub const HEALTH: &str = "/sync/health";
    /// Single push.
    pub const PUSH: &str = "/sync/push";
    /// Batch push.
    pub const BATCH: &str = "/sync/batch";
    /// Incremental pull.
    pub const PULL: &str = "/sync/pull";
    /// Remote version probe.
    pub const VERSION: &str = "/sync/version";
    /// Single item fetch.
    pub const ITEM: &str = "/sync/item";
    /// Conflict resolution write.
    pub const RESOLVE: &str = "/sync/resolve";
    /// Cursor read.
    pub const CURSOR: &str = "/sync/cursor";
    /// Cursor update.
    pub const CURSOR_UPDATE: &str = "/sync/cursor/update";
    /// Quota read.
    pub const QUOTA: &str = "/sync/quota";
    /// Full export.
    pub const EXPORT: &str = "/sync/export";
    /// Full import.
    pub const IMPORT: &str = "/sync/import";
}

/// Request wrapper carrying the session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope<T> {
    /// Session token returned by [`endpoints::AUTH`].
    pub session: Option<String>,
    /// Request body.
    pub body: T,
}

impl<T: Serialize> RequestEnvelope<T> {
    /// Creates an envelope.
    pub fn new(session: Option<String>, body: T) -> Self {
        Self { session, body }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl<T: DeserializeOwned> RequestEnvelope<T> {
    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Category of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// Missing, invalid or expired credentials or session.
    Unauthenticated,
    /// Malformed or oversized request.
    InvalidRequest,
    /// Import checksum mismatch.
    Integrity,
    /// Unknown endpoint.
    NotFound,
    /// Server-side failure; may succeed on retry.
    Internal,
}

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Category.
    pub kind: RemoteErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl RemoteError {
    /// Creates an error body.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseEnvelope<T> {
    /// Successful response.
    Ok(T),
    /// Failed request.
    Err(RemoteError),
}

impl<T: Serialize> ResponseEnvelope<T> {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl<T: DeserializeOwned> ResponseEnvelope<T> {
    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

impl<T> ResponseEnvelope<T> {
    /// Converts to a `Result`.
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            ResponseEnvelope::Ok(value) => Ok(value),
            ResponseEnvelope::Err(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, RemoteError>> for ResponseEnvelope<T> {
    fn from(result: Result<T, RemoteError>) -> Self {
        match result {
            Ok(value) => ResponseEnvelope::Ok(value),
            Err(err) => ResponseEnvelope::Err(err),
        }
    }
}

/// Body of [`endpoints::AUTH`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Opaque credentials.
    pub credentials: AdapterCredentials,
}

/// Response of [`endpoints::AUTH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Session token for subsequent requests.
    pub session: String,
    /// Account the session is bound to.
    pub account: String,
    /// Session expiry (Unix millis), if any.
    pub expires_at: Option<u64>,
}

/// Response of [`endpoints::HEALTH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// The request's session is valid.
    pub authenticated: bool,
    /// The account is over quota.
    pub quota_exceeded: bool,
    /// Last write or pull on the account (Unix millis).
    pub last_sync_time: Option<u64>,
}

/// Body of [`endpoints::PUSH`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Item to write.
    pub item: PushItem,
}

/// Body of [`endpoints::BATCH`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPushRequest {
    /// Items to write.
    pub items: Vec<PushItem>,
}

/// Body of [`endpoints::PULL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Entity type.
    pub entity_type: String,
    /// Cursor timestamp.
    pub since_timestamp: u64,
    /// Cursor version (tie-break for items committed at the same timestamp).
    pub since_version: Option<u64>,
}

/// Body of [`endpoints::VERSION`] and [`endpoints::ITEM`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRequest {
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
}

/// Body of [`endpoints::RESOLVE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Conflict being resolved.
    pub conflict: ConflictRecord,
    /// Resolved value.
    pub resolved: PushItem,
}

/// Body of [`endpoints::CURSOR`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRequest {
    /// Entity type.
    pub entity_type: String,
}

/// Body of [`endpoints::CURSOR_UPDATE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorUpdateRequest {
    /// New cursor.
    pub cursor: SyncCursor,
}

/// Body of [`endpoints::IMPORT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Bundle to import.
    pub bundle: ExportBundle,
    /// Import options.
    pub options: ImportOptions,
}

/// Body of requests that carry no parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}
