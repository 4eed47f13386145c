use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use buildrelay_utils::types::{BuildTask, Round, TaskKey, TaskStatus};
use tracing::debug;

use crate::error::StoreError;
use crate::locks::KeyLocks;
use crate::record::{TransitionFields, apply_transition, check_create};
use crate::TaskStore;

/// Process-local store. Records vanish with the process.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<TaskKey, Vec<BuildTask>>>,
    locks: KeyLocks,
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn latest(&self, key: &TaskKey) -> Option<BuildTask> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|history| history.last().cloned())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: BuildTask) -> Result<(), StoreError> {
        let key = task.key();
        let _guard = self.locks.acquire(&key).await;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let history = records.entry(key.clone()).or_default();
        check_create(history, &task)?;
        debug!(task = %key, nonce = %task.nonce, "Created task record");
        history.push(task);
        Ok(())
    }

    async fn get(&self, task_id: &str, round: Round) -> Result<BuildTask, StoreError> {
        let key = TaskKey::new(task_id, round);
        self.latest(&key).ok_or(StoreError::NotFound(key))
    }

    async fn find(
        &self,
        task_id: &str,
        round: Round,
        nonce: &str,
    ) -> Result<Option<BuildTask>, StoreError> {
        let key = TaskKey::new(task_id, round);
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .and_then(|history| history.iter().find(|t| t.matches_nonce(nonce)).cloned()))
    }

    async fn transition(
        &self,
        task_id: &str,
        round: Round,
        to: TaskStatus,
        fields: TransitionFields,
    ) -> Result<BuildTask, StoreError> {
        let key = TaskKey::new(task_id, round);
        let _guard = self.locks.acquire(&key).await;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let latest = records
            .get_mut(&key)
            .and_then(|history| history.last_mut())
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        apply_transition(latest, to, fields)?;
        Ok(latest.clone())
    }

    async fn list_in_flight(&self) -> Result<Vec<BuildTask>, StoreError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut live: Vec<BuildTask> = records
            .values()
            .filter_map(|history| history.last())
            .filter(|task| !task.is_terminal())
            .cloned()
            .collect();
        live.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(live)
    }

    async fn list_abandoned(&self) -> Result<Vec<BuildTask>, StoreError> {
        // Records never outlive the process that wrote them.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(nonce: &str) -> BuildTask {
        BuildTask::new("t1", Round::Initial, nonce, "brief")
    }

    #[tokio::test]
    async fn create_then_get_returns_latest() {
        let store = InMemoryTaskStore::new();
        store.create(task("n1")).await.unwrap();
        let got = store.get("t1", Round::Initial).await.unwrap();
        assert_eq!(got.nonce, "n1");
        assert_eq!(got.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = InMemoryTaskStore::new();
        assert!(matches!(
            store.get("nope", Round::Revision).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.find("nope", Round::Initial, "n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_after_failure_keeps_history() {
        let store = InMemoryTaskStore::new();
        store.create(task("n1")).await.unwrap();
        store
            .transition("t1", Round::Initial, TaskStatus::Failed, TransitionFields::default())
            .await
            .unwrap();
        store.create(task("n2")).await.unwrap();

        assert_eq!(store.get("t1", Round::Initial).await.unwrap().nonce, "n2");
        let first = store.find("t1", Round::Initial, "n1").await.unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_creates_admit_exactly_one() {
        let store = std::sync::Arc::new(InMemoryTaskStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create(task("same")).await })
            })
            .collect();
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn in_flight_lists_only_live_latest_records() {
        let store = InMemoryTaskStore::new();
        store.create(task("n1")).await.unwrap();
        store
            .create(BuildTask::new("t2", Round::Initial, "n1", "b"))
            .await
            .unwrap();
        store
            .transition("t2", Round::Initial, TaskStatus::Failed, TransitionFields::default())
            .await
            .unwrap();
        let live = store.list_in_flight().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].task_id, "t1");
    }
}
