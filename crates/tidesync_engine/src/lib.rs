//! # TideSync Engine
//!
//! Client side of the TideSync offline-first sync engine.
//!
//! This crate provides:
//! - Client-side AES-256-GCM payload encryption with Argon2id key derivation
//! - The [`SyncAdapter`] port, with an in-process [`MemoryAdapter`] and an
//!   [`HttpAdapter`] over any [`HttpClient`]
//! - Per-entity-type conflict resolution (last-write-wins plus merge hooks)
//! - Cursor persistence and the [`LocalStore`] accessor
//! - The [`SyncCoordinator`] state machine and per-account [`SyncSession`]s
//!
//! ## Cycle
//!
//! Each entity type syncs **pull first, then push**:
//! 1. Pull pages since the stored cursor and apply them in order
//! 2. Resolve dirty local copies against what was pulled
//! 3. Push dirty entities in batches, resolving any conflicts
//!
//! ## Invariants
//!
//! - The backend only ever sees ciphertext
//! - Applying a pulled `(entity_id, version)` twice changes nothing
//! - Cursors only move forward and are saved after a page is fully applied
//! - At most one push per entity is in flight
//! - A local edit made during a cycle is never marked synced by it

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod coordinator;
mod crypto;
mod cursor;
mod error;
mod http;
mod local;
mod locks;
mod memory;
mod resolver;
mod retry;
mod session;

pub use adapter::SyncAdapter;
pub use config::{CoordinatorOptions, SyncConfig};
pub use coordinator::{CycleReport, SyncCoordinator, SyncReport, SyncState, SyncStats};
pub use crypto::{EncryptionService, KdfParams, SyncKey, KEY_SIZE, MIN_SALT_LEN};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{HttpAdapter, HttpClient, LoopbackClient, LoopbackServer};
pub use local::{LocalEntity, LocalStore, MemoryLocalStore, RemoteEntity, SyncNotice};
pub use locks::EntityLocks;
pub use memory::MemoryAdapter;
pub use resolver::{
    ConflictInput, ConflictResolver, EntityState, MaxFieldsMerge, MergeHook, Resolution, Winner,
};
pub use session::{SyncSession, SyncSessionBuilder};
