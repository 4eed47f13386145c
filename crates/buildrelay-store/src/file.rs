//! File-backed store
//!
//! Layout under the state directory:
//!
//! ```text
//! tasks/<task_id>/round-1.json   attempt history for round 1
//! tasks/<task_id>/round-1.lock   advisory lock for cross-process writers
//! owners/<lease id>.lock         held by each open store for its lifetime
//! ```
//!
//! Each JSON document is replaced atomically on every write, so readers never
//! observe a partial record and need no lock. Every write stamps the writer's
//! lease id on the document; [`TaskStore::list_abandoned`] reports live
//! records whose writer no longer holds its lease.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use buildrelay_utils::atomic_write::write_file_atomic;
use buildrelay_utils::paths::{ensure_dir_all, sanitize_path_component};
use buildrelay_utils::types::{BuildTask, Round, TaskKey, TaskStatus};
use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock as FileLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::TaskStore;
use crate::error::StoreError;
use crate::lease::{OwnerLease, owner_is_alive};
use crate::locks::KeyLocks;
use crate::record::{TransitionFields, apply_transition, check_create};

const SCHEMA_VERSION: u32 = 1;

/// On-disk document for one (task, round) key.
#[derive(Debug, Serialize, Deserialize)]
struct RoundRecord {
    schema_version: u32,
    task_id: String,
    round: Round,
    /// Lease id of the store that last wrote this document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    attempts: Vec<BuildTask>,
}

impl RoundRecord {
    fn empty(key: &TaskKey) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            task_id: key.task_id.clone(),
            round: key.round,
            owner: None,
            attempts: Vec::new(),
        }
    }
}

/// Durable store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tasks_dir: Utf8PathBuf,
    owners_dir: Utf8PathBuf,
    lease: OwnerLease,
    locks: KeyLocks,
}

impl FileTaskStore {
    /// Open (creating if needed) the store under `state_dir` and take a
    /// lease that marks this instance as alive until it is dropped.
    ///
    /// # Errors
    ///
    /// Fails if the path is not UTF-8, the directory cannot be created, or
    /// the lease cannot be taken.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let state_dir = Utf8Path::from_path(state_dir.as_ref())
            .ok_or_else(|| StoreError::InvalidPath(state_dir.as_ref().display().to_string()))?;
        let tasks_dir = state_dir.join("tasks");
        ensure_dir_all(&tasks_dir).map_err(|e| StoreError::io(&tasks_dir, e))?;
        let owners_dir = state_dir.join("owners");
        let lease = OwnerLease::acquire(&owners_dir)?;
        debug!(path = %tasks_dir, lease = lease.id(), "Opened file task store");
        Ok(Self {
            inner: Arc::new(Inner {
                tasks_dir,
                owners_dir,
                lease,
                locks: KeyLocks::default(),
            }),
        })
    }

    #[must_use]
    pub fn tasks_dir(&self) -> &Utf8Path {
        &self.inner.tasks_dir
    }

    fn record_path(&self, key: &TaskKey) -> Utf8PathBuf {
        self.inner
            .tasks_dir
            .join(sanitize_path_component(&key.task_id))
            .join(format!("round-{}.json", key.round.number()))
    }

    /// Run a read-modify-write of one key's document on the blocking pool,
    /// holding the in-process key lock and the advisory file lock.
    async fn mutate<T, F>(&self, key: &TaskKey, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RoundRecord) -> Result<T, StoreError> + Send + 'static,
    {
        let _guard = self.inner.locks.acquire(key).await;
        let path = self.record_path(key);
        let key = key.clone();
        let owner = self.inner.lease.id().to_string();
        tokio::task::spawn_blocking(move || mutate_locked(&path, &key, &owner, f))
            .await
            .map_err(|e| StoreError::Persist(format!("store worker failed: {e}")))?
    }

    async fn load(&self, key: &TaskKey) -> Result<Option<RoundRecord>, StoreError> {
        let path = self.record_path(key);
        tokio::task::spawn_blocking(move || read_record(&path))
            .await
            .map_err(|e| StoreError::Persist(format!("store worker failed: {e}")))?
    }
}

fn mutate_locked<T>(
    path: &Utf8Path,
    key: &TaskKey,
    owner: &str,
    f: impl FnOnce(&mut RoundRecord) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let lock_path = path.with_extension("lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| StoreError::io(&lock_path, e))?;
    let mut lock = FileLock::new(lock_file);
    let _held = lock.write().map_err(|e| StoreError::io(&lock_path, e))?;

    let mut record = read_record(path)?.unwrap_or_else(|| RoundRecord::empty(key));
    let result = f(&mut record)?;
    record.owner = Some(owner.to_string());

    let json = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::Corrupt {
        path: path.to_string(),
        source: e,
    })?;
    write_file_atomic(path, &json).map_err(|e| StoreError::Persist(format!("{e:#}")))?;
    Ok(result)
}

fn read_record(path: &Utf8Path) -> Result<Option<RoundRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let record: RoundRecord = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_string(),
        source: e,
    })?;
    if record.schema_version != SCHEMA_VERSION {
        warn!(
            path = %path,
            found = record.schema_version,
            expected = SCHEMA_VERSION,
            "Task record schema version differs"
        );
    }
    Ok(Some(record))
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(&self, task: BuildTask) -> Result<(), StoreError> {
        let key = task.key();
        self.mutate(&key, move |record| {
            check_create(&record.attempts, &task)?;
            debug!(task = %task.key(), nonce = %task.nonce, "Created task record");
            record.attempts.push(task);
            Ok(())
        })
        .await
    }

    async fn get(&self, task_id: &str, round: Round) -> Result<BuildTask, StoreError> {
        let key = TaskKey::new(task_id, round);
        self.load(&key)
            .await?
            .and_then(|mut record| record.attempts.pop())
            .ok_or(StoreError::NotFound(key))
    }

    async fn find(
        &self,
        task_id: &str,
        round: Round,
        nonce: &str,
    ) -> Result<Option<BuildTask>, StoreError> {
        let key = TaskKey::new(task_id, round);
        Ok(self.load(&key).await?.and_then(|record| {
            record
                .attempts
                .into_iter()
                .find(|t| t.matches_nonce(nonce))
        }))
    }

    async fn transition(
        &self,
        task_id: &str,
        round: Round,
        to: TaskStatus,
        fields: TransitionFields,
    ) -> Result<BuildTask, StoreError> {
        let key = TaskKey::new(task_id, round);
        let missing = key.clone();
        self.mutate(&key, move |record| {
            let latest = record
                .attempts
                .last_mut()
                .ok_or(StoreError::NotFound(missing))?;
            apply_transition(latest, to, fields)?;
            Ok(latest.clone())
        })
        .await
    }

    async fn list_in_flight(&self) -> Result<Vec<BuildTask>, StoreError> {
        let tasks_dir = self.inner.tasks_dir.clone();
        let live = tokio::task::spawn_blocking(move || scan_in_flight(&tasks_dir))
            .await
            .map_err(|e| StoreError::Persist(format!("store worker failed: {e}")))??;
        Ok(live.into_iter().map(|(task, _)| task).collect())
    }

    async fn list_abandoned(&self) -> Result<Vec<BuildTask>, StoreError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut abandoned = Vec::new();
            for (task, owner) in scan_in_flight(&inner.tasks_dir)? {
                let gone = match owner.as_deref() {
                    None => true,
                    Some(id) if id == inner.lease.id() => false,
                    Some(id) => !owner_is_alive(&inner.owners_dir, id)?,
                };
                if gone {
                    abandoned.push(task);
                } else {
                    debug!(task = %task.key(), owner = ?owner, "In-flight record has a live owner");
                }
            }
            Ok(abandoned)
        })
        .await
        .map_err(|e| StoreError::Persist(format!("store worker failed: {e}")))?
    }
}

/// Live latest attempts with the lease id of their last writer.
fn scan_in_flight(tasks_dir: &Utf8Path) -> Result<Vec<(BuildTask, Option<String>)>, StoreError> {
    let mut live = Vec::new();
    let entries = match tasks_dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(live),
        Err(e) => return Err(StoreError::io(tasks_dir, e)),
    };
    for task_dir in entries {
        let task_dir = task_dir.map_err(|e| StoreError::io(tasks_dir, e))?;
        if !task_dir.path().is_dir() {
            continue;
        }
        let files = task_dir
            .path()
            .read_dir_utf8()
            .map_err(|e| StoreError::io(task_dir.path(), e))?;
        for file in files {
            let file = file.map_err(|e| StoreError::io(task_dir.path(), e))?;
            if file.path().extension() != Some("json") {
                continue;
            }
            let Some(mut record) = read_record(file.path())? else {
                continue;
            };
            if let Some(latest) = record.attempts.pop()
                && !latest.is_terminal()
            {
                live.push((latest, record.owner));
            }
        }
    }
    live.sort_by(|a, b| a.0.key().cmp(&b.0.key()));
    Ok(live)
}
