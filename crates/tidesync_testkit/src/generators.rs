//! Property-based test generators using proptest.
//!
//! Provides strategies for entity IDs, JSON payloads, device edit scripts
//! and push items.

use proptest::prelude::*;
use serde_json::{json, Value};
use tidesync_protocol::{EncryptedSyncData, PushItem, IV_SIZE, TAG_SIZE};

/// Strategy for generating valid entity IDs.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating entity type names.
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["goal", "task", "note", "habit"]).prop_map(str::to_string)
}

/// Strategy for generating small JSON entity values.
pub fn entity_value_strategy() -> impl Strategy<Value = Value> {
    (
        prop::string::string_regex("[A-Za-z ]{0,24}").expect("Invalid regex"),
        0u32..1000,
        any::<bool>(),
    )
        .prop_map(|(title, progress, done)| {
            json!({ "title": title, "progress": progress, "done": done })
        })
}

/// Strategy for generating opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = EncryptedSyncData> {
    (
        any::<[u8; IV_SIZE]>(),
        any::<[u8; TAG_SIZE]>(),
        prop::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(iv, tag, ciphertext)| EncryptedSyncData::new(iv, tag, ciphertext))
}

/// Strategy for generating first-write push items.
pub fn push_item_strategy() -> impl Strategy<Value = PushItem> {
    (
        entity_type_strategy(),
        entity_id_strategy(),
        payload_strategy(),
        1u64..1_000_000,
    )
        .prop_map(|(entity_type, entity_id, data, modified_at)| {
            PushItem::put(entity_type, entity_id, data, 0, modified_at)
        })
}

/// One local edit made by a simulated device.
#[derive(Debug, Clone)]
pub enum DeviceOperation {
    /// Create or update an entity.
    Put {
        /// Device index.
        device: usize,
        /// Entity ID.
        id: String,
        /// New value.
        value: Value,
    },
    /// Delete an entity.
    Delete {
        /// Device index.
        device: usize,
        /// Entity ID.
        id: String,
    },
    /// Run one sync cycle.
    Sync {
        /// Device index.
        device: usize,
    },
}

/// Strategy for generating device operations over a small ID space.
///
/// IDs are drawn from `e0..e{ids}` so edits collide often.
pub fn device_operation_strategy(
    devices: usize,
    ids: usize,
) -> impl Strategy<Value = DeviceOperation> {
    let id = (0..ids.max(1)).prop_map(|n| format!("e{}", n));
    let device = 0..devices.max(1);
    prop_oneof![
        4 => (device.clone(), id.clone(), entity_value_strategy())
            .prop_map(|(device, id, value)| DeviceOperation::Put { device, id, value }),
        1 => (device.clone(), id).prop_map(|(device, id)| DeviceOperation::Delete { device, id }),
        2 => device.prop_map(|device| DeviceOperation::Sync { device }),
    ]
}

/// Strategy for generating a script of device operations.
pub fn device_script_strategy(
    devices: usize,
    ids: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<DeviceOperation>> {
    prop::collection::vec(device_operation_strategy(devices, ids), 1..max_ops.max(2))
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn entity_id_is_valid(id in entity_id_strategy()) {
            prop_assert!(!id.is_empty());
            prop_assert!(id.chars().next().map_or(false, |c| c.is_ascii_lowercase()));
        }

        #[test]
        fn push_items_are_first_writes(item in push_item_strategy()) {
            prop_assert_eq!(item.expected_version, 0);
            prop_assert!(!item.deleted);
        }

        #[test]
        fn scripts_stay_in_range(script in device_script_strategy(3, 4, 20)) {
            for op in script {
                let device = match op {
                    DeviceOperation::Put { device, .. }
                    | DeviceOperation::Delete { device, .. }
                    | DeviceOperation::Sync { device } => device,
                };
                prop_assert!(device < 3);
            }
        }
    }
}
