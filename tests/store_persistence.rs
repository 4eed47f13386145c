//! File-backed task store under the orchestrator: results survive a process
//! restart, and startup recovery fails attempts a crash left mid-pipeline
//! without touching ones another running process still owns.

#[allow(clippy::duplicate_mod)]
#[path = "test_support/mod.rs"]
mod test_support;

use std::sync::Arc;

use buildrelay_orchestrator::{Admission, recover_interrupted};
use buildrelay_store::{FileTaskStore, StoreError, TaskStore, TransitionFields, open_store};
use buildrelay_utils::types::{BuildTask, ErrorClass, FailureStage, Round, TaskKey, TaskStatus};
use tempfile::TempDir;

use test_support::{Harness, ScriptedAdapter, request};

fn file_store(dir: &TempDir) -> Arc<dyn TaskStore> {
    Arc::new(FileTaskStore::open(dir.path()).unwrap())
}

#[tokio::test]
async fn completed_result_survives_restart_and_is_not_rerun() {
    let dir = TempDir::new().unwrap();

    let first_run = ScriptedAdapter::succeeding("a");
    let h = Harness::builder(&[first_run.clone()])
        .store(file_store(&dir))
        .start();
    let task = h.run(request("t1", 1, "n1")).await;
    assert_eq!(task.status, TaskStatus::Completed);
    h.orchestrator.shutdown().await;

    // New process: fresh adapters, reopened store.
    let second_run = ScriptedAdapter::succeeding("a");
    let h = Harness::builder(&[second_run.clone()])
        .store(file_store(&dir))
        .start();

    let report = h.orchestrator.status("t1", Round::Initial).await.unwrap();
    assert_eq!(report.status, TaskStatus::Completed);
    assert_eq!(report.deployment, task.deployment);
    assert_eq!(report.outcome, task.outcome);

    let again = h.orchestrator.admit(request("t1", 1, "n1")).await.unwrap();
    assert!(matches!(again, Admission::Duplicate(t) if t.status == TaskStatus::Completed));
    assert_eq!(second_run.calls(), 0);
}

#[tokio::test]
async fn round_two_after_restart_inherits_repository() {
    let dir = TempDir::new().unwrap();

    let h = Harness::builder(&[ScriptedAdapter::succeeding("a")])
        .store(file_store(&dir))
        .start();
    let first = h.run(request("t1", 1, "n1")).await;
    h.orchestrator.shutdown().await;

    let h = Harness::builder(&[ScriptedAdapter::succeeding("a")])
        .store(file_store(&dir))
        .start();
    let second = h.run(request("t1", 2, "n2")).await;

    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(
        second.identity.as_ref(),
        first.deployment.as_ref().map(|d| &d.identity)
    );
    assert_eq!(h.publisher.published()[0].0, first.deployment.unwrap().identity);
}

#[tokio::test]
async fn recovery_fails_interrupted_attempts_and_allows_resubmission() {
    let dir = TempDir::new().unwrap();

    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        store
            .create(BuildTask::new("t1", Round::Initial, "n1", "brief"))
            .await
            .unwrap();
        for status in [TaskStatus::Generating, TaskStatus::Publishing] {
            store
                .transition("t1", Round::Initial, status, TransitionFields::default())
                .await
                .unwrap();
        }
        store
            .create(BuildTask::new("t2", Round::Initial, "n1", "brief"))
            .await
            .unwrap();
    }

    let store = file_store(&dir);
    let mut recovered = recover_interrupted(store.as_ref()).await.unwrap();
    recovered.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    assert_eq!(
        recovered,
        vec![
            TaskKey::new("t1", Round::Initial),
            TaskKey::new("t2", Round::Initial)
        ]
    );

    let t1 = store.get("t1", Round::Initial).await.unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    let error = t1.last_error.unwrap();
    assert_eq!(error.stage, FailureStage::Recovery);
    assert_eq!(error.class, ErrorClass::Permanent);
    assert!(error.message.contains("publishing"), "{}", error.message);

    let a = ScriptedAdapter::succeeding("a");
    let h = Harness::builder(&[a.clone()]).store(store).start();

    let cached = h.orchestrator.admit(request("t1", 1, "n1")).await.unwrap();
    assert!(matches!(cached, Admission::Duplicate(t) if t.status == TaskStatus::Failed));

    let retried = h.run(request("t1", 1, "n2")).await;
    assert_eq!(retried.status, TaskStatus::Completed);
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn recovery_leaves_records_of_a_running_process_alone() {
    let dir = TempDir::new().unwrap();
    let busy = FileTaskStore::open(dir.path()).unwrap();
    busy.create(BuildTask::new("t1", Round::Initial, "n1", "brief"))
        .await
        .unwrap();
    busy.transition("t1", Round::Initial, TaskStatus::Generating, TransitionFields::default())
        .await
        .unwrap();

    // A second process starting on the same state dir.
    let starting = file_store(&dir);
    assert!(recover_interrupted(starting.as_ref()).await.unwrap().is_empty());

    let moved = busy
        .transition("t1", Round::Initial, TaskStatus::Publishing, TransitionFields::default())
        .await
        .unwrap();
    assert_eq!(moved.status, TaskStatus::Publishing);

    drop(busy);
    let recovered = recover_interrupted(starting.as_ref()).await.unwrap();
    assert_eq!(recovered, vec![TaskKey::new("t1", Round::Initial)]);
    let t1 = starting.get("t1", Round::Initial).await.unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
}

#[tokio::test]
async fn illegal_transitions_are_rejected_by_both_backends() {
    let dir = TempDir::new().unwrap();
    for backend in ["file", "memory"] {
        let store = open_store(backend, dir.path()).unwrap();
        store
            .create(BuildTask::new("t1", Round::Initial, "n1", "brief"))
            .await
            .unwrap();

        let skipped = store
            .transition("t1", Round::Initial, TaskStatus::Completed, TransitionFields::default())
            .await
            .unwrap_err();
        assert!(
            matches!(
                skipped,
                StoreError::InvalidTransition {
                    from: TaskStatus::Pending,
                    to: TaskStatus::Completed,
                    ..
                }
            ),
            "{backend}: {skipped:?}"
        );

        store
            .transition("t1", Round::Initial, TaskStatus::Failed, TransitionFields::default())
            .await
            .unwrap();
        let reopened = store
            .transition("t1", Round::Initial, TaskStatus::Generating, TransitionFields::default())
            .await
            .unwrap_err();
        assert!(
            matches!(reopened, StoreError::InvalidTransition { .. }),
            "{backend}: terminal records are final"
        );
    }
}

#[test]
fn unknown_backend_is_refused() {
    let dir = TempDir::new().unwrap();
    assert!(open_store("sqlite", dir.path()).is_err());
}
