use std::sync::Arc;

use buildrelay_utils::types::TaskKey;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Permit, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::admission::AdmissionError;
use crate::pipeline::Pipeline;

/// Bounded queue of admitted keys drained by a fixed set of workers.
pub(crate) struct WorkerPool {
    sender: mpsc::Sender<TaskKey>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub(crate) fn start(workers: usize, capacity: usize, pipeline: Arc<Pipeline>) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(key) = next else { break };
                        debug!(worker = id, task = %key, "Worker picked up task");
                        pipeline.run(&key).await;
                    }
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender,
            workers,
            capacity,
        }
    }

    /// Claim a queue slot without waiting.
    pub(crate) fn try_reserve(&self) -> Result<Permit<'_, TaskKey>, AdmissionError> {
        self.sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) | TrySendError::Closed(()) => AdmissionError::Busy {
                capacity: self.capacity,
            },
        })
    }

    /// Close the queue and wait for the workers to finish what is queued.
    pub(crate) async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}
