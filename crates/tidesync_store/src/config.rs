//! Store configuration.

use serde::{Deserialize, Serialize};

/// Default number of items returned by one pull.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Configuration for a [`VersionedStore`](crate::VersionedStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum items per pull page.
    pub page_size: usize,
    /// Storage quota in bytes; `None` means unlimited.
    pub quota_bytes: Option<u64>,
    /// Label recorded as the source of exported bundles.
    pub name: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            quota_bytes: None,
            name: None,
        }
    }
}

impl StoreConfig {
    /// Sets the page size. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the storage quota in bytes.
    #[must_use]
    pub fn with_quota_bytes(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Sets the export source label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = StoreConfig::default()
            .with_page_size(0)
            .with_quota_bytes(1024)
            .with_name("primary");
        assert_eq!(config.page_size, 1);
        assert_eq!(config.quota_bytes, Some(1024));
        assert_eq!(config.name.as_deref(), Some("primary"));
        assert_eq!(StoreConfig::default().page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"quota_bytes": 2048}"#).unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.quota_bytes, Some(2048));
    }
}
