use buildrelay_store::{StoreError, TaskStore, TransitionFields};
use buildrelay_utils::types::{ErrorClass, FailureDescriptor, FailureStage, TaskKey, TaskStatus};
use tracing::{info, warn};

/// Fail every attempt a process that has since exited left mid-pipeline.
///
/// Attempts owned by a store that is still open, here or in another process
/// sharing the state dir, are left alone. Abandoned ones would otherwise
/// block their keys forever. Callers retry by resubmitting with a new nonce.
///
/// # Errors
///
/// Returns the first store error; records already recovered stay recovered.
pub async fn recover_interrupted(store: &dyn TaskStore) -> Result<Vec<TaskKey>, StoreError> {
    let mut recovered = Vec::new();
    for task in store.list_abandoned().await? {
        let descriptor = FailureDescriptor::new(
            FailureStage::Recovery,
            ErrorClass::Permanent,
            format!(
                "interrupted while {}; resubmit with a new nonce",
                task.status
            ),
        );
        store
            .transition(
                &task.task_id,
                task.round,
                TaskStatus::Failed,
                TransitionFields::failed(descriptor),
            )
            .await?;
        warn!(task = %task.key(), nonce = %task.nonce, was = %task.status, "Recovered interrupted task");
        recovered.push(task.key());
    }
    if !recovered.is_empty() {
        info!(count = recovered.len(), "Recovery complete");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrelay_store::FileTaskStore;
    use buildrelay_utils::types::{BuildTask, Round};
    use tempfile::TempDir;

    async fn leave_generating(dir: &TempDir) {
        let store = FileTaskStore::open(dir.path()).unwrap();
        store
            .create(BuildTask::new("t1", Round::Initial, "n1", "b"))
            .await
            .unwrap();
        store
            .transition("t1", Round::Initial, TaskStatus::Generating, TransitionFields::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn abandoned_records_become_failed_with_recovery_stage() {
        let dir = TempDir::new().unwrap();
        leave_generating(&dir).await;
        let store = FileTaskStore::open(dir.path()).unwrap();

        let recovered = recover_interrupted(&store).await.unwrap();
        assert_eq!(recovered, vec![TaskKey::new("t1", Round::Initial)]);

        let task = store.get("t1", Round::Initial).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.last_error.unwrap();
        assert_eq!(error.stage, FailureStage::Recovery);
        assert!(error.message.contains("generating"));

        assert!(recover_interrupted(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn own_live_records_are_left_alone() {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::open(dir.path()).unwrap();
        store
            .create(BuildTask::new("t1", Round::Initial, "n1", "b"))
            .await
            .unwrap();

        assert!(recover_interrupted(&store).await.unwrap().is_empty());
        let task = store.get("t1", Round::Initial).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
