//! Test fixtures: keys, backends and simulated devices.
//!
//! A [`TestBackend`] is one shared [`VersionedStore`]; every
//! [`TestDevice`] created from it has its own adapter scope, cursor store,
//! local stores and coordinator, like a phone and a laptop talking to the
//! same account.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tidesync_engine::{
    CoordinatorOptions, CycleReport, EncryptionService, HttpAdapter, KdfParams,
    LoopbackClient, LoopbackServer, MemoryAdapter, MemoryCursorStore, MemoryLocalStore,
    SyncAdapter, SyncConfig, SyncCoordinator, SyncKey, SyncReport, SyncResult,
};
use tidesync_protocol::AdapterCredentials;
use tidesync_server::SyncServer;
use tidesync_store::{StoreConfig, VersionedStore};

/// Password used by [`password_encryption`].
pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Salt used by [`password_encryption`].
pub const TEST_SALT: &[u8] = b"tidesync-test-salt";

/// Returns a deterministic key whose bytes are all `seed`.
pub fn test_key(seed: u8) -> SyncKey {
    SyncKey::from_bytes(&[seed; tidesync_engine::KEY_SIZE]).expect("Failed to build test key")
}

/// Returns an encryption service over [`test_key`].
pub fn test_encryption(seed: u8) -> Arc<EncryptionService> {
    Arc::new(EncryptionService::new(&test_key(seed)))
}

/// Derives an encryption service from [`TEST_PASSWORD`] with cheap KDF costs.
pub fn password_encryption() -> Arc<EncryptionService> {
    Arc::new(
        EncryptionService::from_password(TEST_PASSWORD.as_bytes(), TEST_SALT, &KdfParams::fast())
            .expect("Failed to derive test key"),
    )
}

/// Tunables that keep retries fast in tests.
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry_count(2)
        .with_retry_delay(Duration::from_millis(1))
        .with_timeout(Duration::from_secs(5))
}

/// A shared backend for simulated devices.
#[derive(Debug, Clone)]
pub struct TestBackend {
    store: Arc<VersionedStore>,
    seed: u8,
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBackend {
    /// Creates a backend with default store settings.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a backend with custom store settings.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            store: Arc::new(VersionedStore::new(config)),
            seed: 7,
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    /// Creates an authenticated device sharing this backend's key.
    pub async fn device(&self, name: &str, entity_types: &[&str]) -> TestDevice {
        self.device_with_key(name, entity_types, self.seed).await
    }

    /// Creates an authenticated device with its own key seed.
    pub async fn device_with_key(&self, name: &str, entity_types: &[&str], seed: u8) -> TestDevice {
        let adapter = self.adapter(name).await;
        TestDevice::new(name, adapter.clone(), Some(adapter), test_encryption(seed), entity_types)
    }

    /// Creates an authenticated adapter scoped to `name`.
    pub async fn adapter(&self, name: &str) -> Arc<MemoryAdapter> {
        let adapter = Arc::new(
            MemoryAdapter::new(Arc::clone(&self.store), name).with_config(fast_sync_config()),
        );
        adapter
            .authenticate(&AdapterCredentials::new())
            .await
            .expect("Failed to authenticate test adapter");
        adapter
    }
}

/// A simulated device: local stores plus a coordinator.
pub struct TestDevice {
    name: String,
    memory: Option<Arc<MemoryAdapter>>,
    coordinator: Arc<SyncCoordinator>,
    stores: BTreeMap<String, Arc<MemoryLocalStore>>,
}

impl TestDevice {
    /// Creates a device over any adapter and registers one local store per
    /// entity type.
    pub fn new(
        name: &str,
        adapter: Arc<dyn SyncAdapter>,
        memory: Option<Arc<MemoryAdapter>>,
        crypto: Arc<EncryptionService>,
        entity_types: &[&str],
    ) -> Self {
        let coordinator = SyncCoordinator::new(adapter, crypto)
            .with_cursor_store(Arc::new(MemoryCursorStore::new()));
        Self::from_coordinator(name, memory, coordinator, entity_types)
    }

    /// Wraps a configured coordinator.
    pub fn from_coordinator(
        name: &str,
        memory: Option<Arc<MemoryAdapter>>,
        coordinator: SyncCoordinator,
        entity_types: &[&str],
    ) -> Self {
        let coordinator = Arc::new(coordinator);
        let mut stores = BTreeMap::new();
        for entity_type in entity_types {
            let store = Arc::new(MemoryLocalStore::new());
            coordinator.register(*entity_type, store.clone());
            stores.insert(entity_type.to_string(), store);
        }
        Self {
            name: name.to_string(),
            memory,
            coordinator,
            stores,
        }
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Returns the in-memory adapter, if this device uses one.
    pub fn memory_adapter(&self) -> Option<&Arc<MemoryAdapter>> {
        self.memory.as_ref()
    }

    /// Returns the local store of `entity_type`.
    ///
    /// # Panics
    ///
    /// Panics if the type was not registered.
    pub fn store(&self, entity_type: &str) -> &Arc<MemoryLocalStore> {
        self.stores
            .get(entity_type)
            .unwrap_or_else(|| panic!("{} has no store for '{}'", self.name, entity_type))
    }

    /// Runs one cycle for `entity_type`.
    pub async fn sync(&self, entity_type: &str) -> SyncResult<CycleReport> {
        self.coordinator.sync_entity_type(entity_type).await
    }

    /// Runs one cycle for every registered type.
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        self.coordinator.sync_all().await
    }
}

impl std::fmt::Debug for TestDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDevice")
            .field("name", &self.name)
            .field("entity_types", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Routes loopback requests into a [`SyncServer`].
#[derive(Debug, Clone)]
pub struct ServerBridge(pub Arc<SyncServer>);

impl LoopbackServer for ServerBridge {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

/// An HTTP adapter wired straight into `server`.
pub type LoopbackAdapter = HttpAdapter<LoopbackClient<ServerBridge>>;

/// Creates an unauthenticated HTTP adapter over `server`.
pub fn loopback_adapter(server: &Arc<SyncServer>) -> Arc<LoopbackAdapter> {
    Arc::new(
        HttpAdapter::new(
            "http://loopback.test",
            LoopbackClient::new(ServerBridge(Arc::clone(server))),
        )
        .with_config(fast_sync_config()),
    )
}

/// Creates a device that talks to `server` over the loopback transport.
///
/// The device authenticates with `credentials` plus its own name as the
/// cursor scope.
pub async fn http_device(
    server: &Arc<SyncServer>,
    name: &str,
    credentials: AdapterCredentials,
    crypto: Arc<EncryptionService>,
    entity_types: &[&str],
) -> SyncResult<(TestDevice, Arc<LoopbackAdapter>)> {
    let adapter = loopback_adapter(server);
    adapter
        .authenticate(&credentials.with("device", name))
        .await?;
    let device = TestDevice::new(name, adapter.clone(), None, crypto, entity_types);
    Ok((device, adapter))
}

/// Coordinator options with a small push batch, for exercising chunking.
pub fn small_batches(size: usize) -> CoordinatorOptions {
    CoordinatorOptions::default().with_push_batch_size(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn devices_share_a_backend() {
        let backend = TestBackend::new();
        let phone = backend.device("phone", &["goal"]).await;
        let laptop = backend.device("laptop", &["goal"]).await;

        phone.store("goal").put("g1", json!({"title": "walk"}));
        phone.sync("goal").await.unwrap();
        laptop.sync("goal").await.unwrap();

        assert_eq!(laptop.store("goal").value("g1"), Some(json!({"title": "walk"})));
        assert_eq!(backend.store().len(), 1);
    }

    #[tokio::test]
    async fn http_devices_reach_the_server() {
        let server = Arc::new(SyncServer::new(Default::default()));
        let (device, adapter) = http_device(
            &server,
            "phone",
            AdapterCredentials::new(),
            test_encryption(1),
            &["goal"],
        )
        .await
        .unwrap();
        assert_eq!(adapter.account().as_deref(), Some(tidesync_server::DEFAULT_ACCOUNT));

        device.store("goal").put("g1", json!({"n": 1}));
        let report = device.sync("goal").await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(server.account_store(tidesync_server::DEFAULT_ACCOUNT).len(), 1);
    }

    #[test]
    fn test_keys_are_deterministic() {
        let data = test_encryption(1).encrypt(b"hello").unwrap();
        assert_eq!(test_encryption(1).decrypt(&data).unwrap(), b"hello");
        assert!(test_encryption(2).decrypt(&data).is_err());
    }
}
