//! Opaque adapter credentials.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Backend-specific credential bag.
///
/// The coordinator never interprets the contents; adapters read the keys
/// they understand (typically `token`, sometimes `account` or `device`).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCredentials {
    values: BTreeMap<String, String>,
}

impl AdapterCredentials {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bag holding a single bearer token.
    pub fn token(token: impl Into<String>) -> Self {
        Self::new().with("token", token)
    }

    /// Adds a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Returns a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the bearer token, if present.
    pub fn bearer(&self) -> Option<&str> {
        self.get("token")
    }

    /// Returns true if the bag holds nothing.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for AdapterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, "[REDACTED]")))
            .finish()
    }
}
