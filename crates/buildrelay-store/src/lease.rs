//! Process leases for the file store
//!
//! Every open [`crate::FileTaskStore`] holds an exclusive advisory lock on
//! `owners/<id>.lock` for as long as it lives, and stamps its id on each
//! record it writes. The operating system drops the lock when the process
//! exits, so a record whose owner's lease can be locked by anyone else was
//! left behind by a process that is gone.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use buildrelay_utils::paths::sanitize_path_component;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use fd_lock::RwLock as FileLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StoreError;

static NEXT_LEASE: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize)]
struct LeaseInfo<'a> {
    id: &'a str,
    pid: u32,
    acquired_at: String,
}

/// The lock is held by a dedicated thread until the lease is dropped.
#[derive(Debug)]
pub(crate) struct OwnerLease {
    id: String,
    path: Utf8PathBuf,
    release: Option<mpsc::Sender<()>>,
    holder: Option<JoinHandle<()>>,
}

impl OwnerLease {
    pub(crate) fn acquire(owners_dir: &Utf8Path) -> Result<Self, StoreError> {
        fs::create_dir_all(owners_dir).map_err(|e| StoreError::io(owners_dir, e))?;
        let id = format!(
            "{}-{:x}-{}",
            std::process::id(),
            Utc::now().timestamp_micros(),
            NEXT_LEASE.fetch_add(1, Ordering::Relaxed)
        );
        let path = lease_path(owners_dir, &id);
        let file = create_lease_file(&path).map_err(|e| StoreError::io(&path, e))?;

        let info = serde_json::to_vec_pretty(&LeaseInfo {
            id: &id,
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339(),
        })
        .map_err(|e| StoreError::Persist(format!("lease info: {e}")))?;

        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = thread::Builder::new()
            .name(format!("buildrelay-lease-{id}"))
            .spawn(move || {
                let mut lock = FileLock::new(file);
                let held = match lock.try_write() {
                    Ok(held) => held,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let mut file_ref = &*held;
                let written = file_ref.write_all(&info).and_then(|()| file_ref.flush());
                let _ = ready_tx.send(written);
                // Returns once the sender is dropped.
                let _ = release_rx.recv();
            })
            .map_err(|e| StoreError::io(&path, e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(StoreError::io(&path, e)),
            Err(_) => {
                return Err(StoreError::Persist(format!(
                    "lease holder for {path} exited early"
                )));
            }
        }
        debug!(lease = %id, "Acquired store lease");
        Ok(Self {
            id,
            path,
            release: Some(release_tx),
            holder: Some(holder),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for OwnerLease {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path, error = %e, "Could not remove lease file");
        }
        drop(self.release.take());
        if let Some(holder) = self.holder.take()
            && holder.join().is_err()
        {
            warn!(lease = %self.id, "Lease holder thread panicked");
        }
    }
}

/// Whether the process that owns lease `id` is still running.
///
/// A missing lease file or one nobody holds means the owner is gone. Any
/// failure to take the lock counts as alive, so a record is never taken
/// from an owner that might still be working on it.
pub(crate) fn owner_is_alive(owners_dir: &Utf8Path, id: &str) -> Result<bool, StoreError> {
    let path = lease_path(owners_dir, id);
    let file = match OpenOptions::new().write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    let mut lock = FileLock::new(file);
    let alive = lock.try_write().is_err();
    if !alive {
        debug!(lease = %id, "Lease is free; owner has exited");
    }
    Ok(alive)
}

fn lease_path(owners_dir: &Utf8Path, id: &str) -> Utf8PathBuf {
    owners_dir.join(format!("{}.lock", sanitize_path_component(id)))
}

fn create_lease_file(path: &Utf8Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
}
