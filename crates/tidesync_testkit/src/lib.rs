//! # TideSync Testkit
//!
//! Test utilities for TideSync.
//!
//! This crate provides:
//! - Fixed test keys and cheap password-derived keys
//! - Shared in-memory backends with simulated devices
//! - Loopback wiring from `HttpAdapter` into the reference server
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tidesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices() {
//!     let backend = TestBackend::new();
//!     let phone = backend.device("phone", &["goal"]).await;
//!     let laptop = backend.device("laptop", &["goal"]).await;
//!     // ... edit on one, sync both
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
