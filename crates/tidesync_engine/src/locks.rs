//! Per-entity async locks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type EntityKey = (String, String);

/// Serialises work on one `(entity_type, entity_id)`.
///
/// Guards are owned, so they can be held across awaits and are released
/// when a cancelled task is dropped.
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<EntityKey, Arc<AsyncMutex<()>>>>,
}

impl EntityLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock on one entity.
    pub async fn acquire(&self, entity_type: &str, entity_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry((entity_type.to_string(), entity_id.to_string()))
                    .or_default(),
            )
        };
        lock.lock_owned().await
    }

    /// Drops table entries nobody holds or waits for.
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_entity_is_exclusive() {
        let locks = Arc::new(EntityLocks::new());
        let guard = locks.acquire("goal", "g1").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("goal", "g1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_entities_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.acquire("goal", "g1").await;
        let _b = locks.acquire("goal", "g2").await;
        let _c = locks.acquire("task", "g1").await;
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = EntityLocks::new();
        let held = locks.acquire("goal", "g1").await;
        drop(locks.acquire("goal", "g2").await);

        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
