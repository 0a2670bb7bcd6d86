//! Per-vault mutation locks

use keyhaven_core::KeyId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry handing out one async lock per vault
///
/// Entries are created on first use. An entry nobody holds or waits on is dropped the
/// next time any vault is locked, so the map tracks vaults in flight.
#[derive(Debug, Default)]
pub struct VaultLocks {
    locks: Mutex<HashMap<KeyId, Arc<AsyncMutex<()>>>>,
}

impl VaultLocks {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `vault`
    pub async fn lock(&self, vault: &KeyId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // Guards and waiters each own a clone
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(vault.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Vaults with a live entry
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no entry is live
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_vault_is_serialized() {
        let locks = Arc::new(VaultLocks::new());
        let vault = KeyId::new("v");
        let guard = locks.lock(&vault).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let vault = vault.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&vault).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_vaults_do_not_block() {
        let locks = VaultLocks::new();
        let _a = locks.lock(&KeyId::new("a")).await;
        let _b = locks.lock(&KeyId::new("b")).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = VaultLocks::new();
        drop(locks.lock(&KeyId::new("a")).await);
        assert_eq!(locks.len(), 1);

        let held = locks.lock(&KeyId::new("b")).await;
        assert_eq!(locks.len(), 1);
        let _c = locks.lock(&KeyId::new("c")).await;
        assert_eq!(locks.len(), 2);
        drop(held);
        drop(locks.lock(&KeyId::new("a")).await);
        assert_eq!(locks.len(), 2);
    }
}
