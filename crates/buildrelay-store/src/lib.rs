//! Task state store
//!
//! The store is the single owner of persisted [`BuildTask`] records. Each
//! (task, round) key holds an ordered history of attempts, one per nonce; the
//! last entry is the one that status queries and transitions act on.
//!
//! Two guarantees callers rely on:
//! - `create` checks idempotency and inserts under the key's lock, so two
//!   racing admissions of the same key can never both succeed.
//! - `transition` validates the move against the state machine, so an
//!   illegal status change is refused rather than persisted.

mod error;
mod file;
mod lease;
mod locks;
mod memory;
mod record;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use buildrelay_utils::types::{BuildTask, Round, TaskStatus};

pub use error::StoreError;
pub use file::FileTaskStore;
pub use memory::InMemoryTaskStore;
pub use record::TransitionFields;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new attempt.
    ///
    /// Fails with [`StoreError::Conflict`] when the nonce is already recorded
    /// for this key and [`StoreError::InFlight`] when the key's latest attempt
    /// has not finished. Both carry the conflicting record.
    async fn create(&self, task: BuildTask) -> Result<(), StoreError>;

    /// Latest attempt for the key.
    async fn get(&self, task_id: &str, round: Round) -> Result<BuildTask, StoreError>;

    /// The attempt recorded under `nonce`, if any.
    async fn find(
        &self,
        task_id: &str,
        round: Round,
        nonce: &str,
    ) -> Result<Option<BuildTask>, StoreError>;

    /// Move the key's latest attempt to `to` and return the updated record.
    async fn transition(
        &self,
        task_id: &str,
        round: Round,
        to: TaskStatus,
        fields: TransitionFields,
    ) -> Result<BuildTask, StoreError>;

    /// Latest attempts that have not reached a terminal state.
    async fn list_in_flight(&self) -> Result<Vec<BuildTask>, StoreError>;

    /// In-flight attempts whose writer has exited.
    ///
    /// Attempts still owned by a running store, in this process or another,
    /// are left out.
    async fn list_abandoned(&self) -> Result<Vec<BuildTask>, StoreError>;
}

/// Open the backend named in configuration.
///
/// # Errors
///
/// Returns an error for an unknown backend or when the file store cannot be
/// opened.
pub fn open_store(backend: &str, state_dir: &Path) -> Result<Arc<dyn TaskStore>, StoreError> {
    match backend {
        "memory" => Ok(Arc::new(InMemoryTaskStore::new())),
        "file" => Ok(Arc::new(FileTaskStore::open(state_dir)?)),
        other => Err(StoreError::Persist(format!("unknown store backend '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_open_by_name() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(open_store("memory", dir.path()).is_ok());
        assert!(open_store("file", dir.path()).is_ok());
        assert!(dir.path().join("tasks").is_dir());
        assert!(open_store("redis", dir.path()).is_err());
    }
}
