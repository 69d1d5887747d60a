//! # TideSync Server
//!
//! Reference sync server for TideSync.
//!
//! This crate provides:
//! - The CBOR request/response protocol behind `HttpAdapter`
//! - One [`VersionedStore`](tidesync_store::VersionedStore) per account
//! - HMAC-SHA256 account tokens and expiring sessions
//! - Per-device cursor scopes
//! - Account snapshots on disk
//!
//! The server is zero-knowledge: it stores and serves ciphertext only.
//!
//! # Authentication
//!
//! Authentication is optional but recommended for production:
//!
//! ```rust
//! use tidesync_server::{ServerConfig, SyncServer};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::new(ServerConfig::default().with_auth(secret));
//!
//! // Hand this to the device out of band; it authenticates with
//! // credentials `{ "account": "alice", "token": <token> }`.
//! let token = server.create_token("alice").unwrap();
//! assert!(token.starts_with("v1."));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, DEFAULT_ACCOUNT};
pub use server::SyncServer;
