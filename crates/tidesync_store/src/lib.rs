//! # TideSync Store
//!
//! Versioned remote entity store for TideSync.
//!
//! [`VersionedStore`] holds encrypted entities keyed by
//! `(entity_type, entity_id)` and implements the backend side of the sync
//! protocol: optimistic-concurrency pushes, cursor-based pulls, per-scope
//! cursors, quota accounting and checksum-gated import. The in-process
//! adapter and the reference server both sit on top of it.
//!
//! ## Example
//!
//! ```rust
//! use tidesync_protocol::{EncryptedSyncData, PushItem};
//! use tidesync_store::{StoreConfig, VersionedStore};
//!
//! let store = VersionedStore::new(StoreConfig::default());
//! let data = EncryptedSyncData::new([0; 12], [0; 16], vec![1, 2, 3]);
//!
//! let outcome = store.push(PushItem::put("goal", "g1", data.clone(), 0, 1));
//! assert_eq!(outcome.version(), Some(1));
//!
//! // A second writer that still expects version 0 conflicts.
//! let stale = store.push(PushItem::put("goal", "g1", data, 0, 2));
//! assert!(stale.conflict_detected());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod snapshot;
mod versioned;

pub use config::{StoreConfig, DEFAULT_PAGE_SIZE};
pub use error::{StoreError, StoreResult};
pub use snapshot::{is_missing, load_snapshot, read_bundle, save_snapshot, write_bundle};
pub use versioned::VersionedStore;
