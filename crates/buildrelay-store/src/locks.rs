use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use buildrelay_utils::types::TaskKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per task key, created on first use.
///
/// Serializes create and transition on the same key while leaving unrelated
/// keys free to proceed. An entry is dropped again once nobody holds or
/// waits for it.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<TaskKey, Arc<AsyncMutex<()>>>>,
}

/// Held key lock; releasing it prunes the key's entry when it is idle.
pub(crate) struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: TaskKey,
    held: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub(crate) async fn acquire(&self, key: &TaskKey) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        KeyGuard {
            owner: self,
            key: key.clone(),
            held: Some(lock.lock_owned().await),
        }
    }

    fn release(&self, key: &TaskKey) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the Arc under this map lock, so a count of 1 means idle.
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.owner.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrelay_utils::types::Round;
    use std::time::Duration;

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyLocks::default();
        let _a = locks.acquire(&TaskKey::new("a", Round::Initial)).await;
        let _b = locks.acquire(&TaskKey::new("a", Round::Revision)).await;
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyLocks::default();
        let key = TaskKey::new("a", Round::Initial);
        let guard = locks.acquire(&key).await;
        let pending =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire(&key)).await;
        assert!(pending.is_err());
        drop(guard);
        let _again = locks.acquire(&key).await;
    }

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks = KeyLocks::default();
        for i in 0..50 {
            let _guard = locks.acquire(&TaskKey::new(format!("t{i}"), Round::Initial)).await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = Arc::new(KeyLocks::default());
        let key = TaskKey::new("a", Round::Initial);
        let first = locks.acquire(&key).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let key = key.clone();
            tokio::spawn(async move {
                let _second = locks.acquire(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert!(locks.len() <= 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
