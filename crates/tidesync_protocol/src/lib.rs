//! # TideSync Protocol
//!
//! Sync data model and wire codecs for TideSync.
//!
//! This crate provides:
//! - `EncryptedSyncData`, the opaque ciphertext bundle that crosses the adapter boundary
//! - `SyncItem` / `PushItem` for pull and push
//! - `SyncCursor` for incremental pulls
//! - Typed outcomes (`PushOutcome`, `PullResult`, `BatchPushResult`)
//! - `ExportBundle` with checksum validation
//! - Request/response envelopes and CBOR encoding for network transports
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod codec;
mod conflict;
mod credentials;
mod cursor;
mod error;
mod item;
pub mod messages;
mod outcome;
mod payload;
mod quota;

pub use bundle::{BundleMetadata, ExportBundle, ImportMode, ImportOptions, ImportReport, BUNDLE_FORMAT_VERSION};
pub use codec::{from_cbor, now_millis, to_cbor};
pub use conflict::ConflictRecord;
pub use credentials::AdapterCredentials;
pub use cursor::SyncCursor;
pub use error::{ProtocolError, ProtocolResult};
pub use item::{PushItem, RemoteVersion, SyncItem};
pub use outcome::{BatchItemResult, BatchPushResult, FailureReason, PullResult, PushOutcome};
pub use payload::{EncryptedSyncData, IV_SIZE, TAG_SIZE};
pub use quota::{AdapterHealth, Quota};
