//! Storage accounting and adapter health.

use serde::{Deserialize, Serialize};

/// Backend storage accounting in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Bytes in use.
    pub used: u64,
    /// Bytes allowed.
    pub total: u64,
    /// Bytes still available.
    pub available: u64,
    /// `used / total` as a percentage (0.0 - 100.0, may exceed 100 after a shrink).
    pub usage_percent: f64,
}

impl Quota {
    /// Computes a quota snapshot.
    pub fn new(used: u64, total: u64) -> Self {
        let usage_percent = if total == 0 {
            100.0
        } else {
            used as f64 * 100.0 / total as f64
        };
        Self {
            used,
            total,
            available: total.saturating_sub(used),
            usage_percent,
        }
    }

    /// Unlimited quota (used only by adapters with no accounting).
    pub fn unlimited(used: u64) -> Self {
        Self::new(used, u64::MAX)
    }

    /// Returns true once no bytes are available.
    pub fn is_exceeded(&self) -> bool {
        self.used >= self.total
    }

    /// Returns true if `additional` more bytes would fit.
    pub fn fits(&self, additional: u64) -> bool {
        additional <= self.available
    }
}

/// Liveness probe result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHealth {
    /// The backend is reachable.
    pub connected: bool,
    /// The adapter holds a valid session.
    pub authenticated: bool,
    /// The backend refuses writes because of its quota.
    pub quota_exceeded: bool,
    /// Last successful write or pull observed by the adapter (Unix millis).
    pub last_sync_time: Option<u64>,
}

impl AdapterHealth {
    /// Health of an adapter that could not reach its backend.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Returns true if a sync cycle can start.
    pub fn is_ready(&self) -> bool {
        self.connected && self.authenticated
    }
}
