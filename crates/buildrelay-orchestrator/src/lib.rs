//! Build orchestration
//!
//! [`Orchestrator::admit`] runs the admission gate (request validation,
//! idempotency, the round gate, inline attachment decoding), records the
//! attempt at Pending, and queues its key. Workers then fetch any URL
//! attachments and drive each key through the pipeline on their own;
//! admission never waits on the network or on execution.

mod admission;
mod attachments;
mod pipeline;
mod pool;
mod recovery;
mod request;
mod scaffold;
mod status;

use std::sync::Arc;
use std::time::Duration;

use buildrelay_config::PipelineConfig;
use buildrelay_delivery::{Notifier, RepositoryPublisher};
use buildrelay_llm::FallbackSelector;
use buildrelay_store::{StoreError, TaskStore};
use buildrelay_utils::types::{BuildTask, RepositoryIdentity, Round, TaskKey, TaskStatus};
use tokio::time::sleep;
use tracing::{debug, info};

pub use admission::{Admission, AdmissionError};
pub use attachments::{AttachmentResolver, decode_data_uri, split_attachments};
pub use pipeline::PublishPolicy;
pub use recovery::recover_interrupted;
pub use request::{AttachmentRef, BuildRequest};
pub use scaffold::finalize_files;
pub use status::StatusReport;

use pipeline::Pipeline;
use pool::WorkerPool;

/// Sizing and retry settings for one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub publish: PublishPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            publish: PublishPolicy::default(),
        }
    }
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self {
            workers: pipeline.workers(),
            queue_capacity: pipeline.queue_capacity(),
            publish: PublishPolicy::from_config(pipeline),
        }
    }
}

/// The collaborators an orchestrator drives.
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub selector: FallbackSelector,
    pub publisher: Arc<dyn RepositoryPublisher>,
    pub notifier: Arc<dyn Notifier>,
    pub attachments: AttachmentResolver,
}

pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    pool: WorkerPool,
}

impl Orchestrator {
    /// Start the worker pool on the current tokio runtime.
    #[must_use]
    pub fn start(parts: Collaborators, settings: OrchestratorSettings) -> Self {
        let pipeline = Arc::new(Pipeline {
            store: Arc::clone(&parts.store),
            selector: Arc::new(parts.selector),
            publisher: parts.publisher,
            notifier: parts.notifier,
            attachments: parts.attachments,
            publish: settings.publish,
        });
        info!(
            workers = settings.workers,
            queue_capacity = settings.queue_capacity,
            "Starting orchestrator"
        );
        Self {
            store: parts.store,
            pool: WorkerPool::start(settings.workers, settings.queue_capacity, pipeline),
        }
    }

    /// Admit a request.
    ///
    /// Returns as soon as the attempt is recorded and queued, or immediately
    /// with the earlier record when this exact triple already finished.
    ///
    /// # Errors
    ///
    /// See [`AdmissionError`]. No record is created when admission fails.
    pub async fn admit(&self, request: BuildRequest) -> Result<Admission, AdmissionError> {
        let round = request.validate()?;

        if let Some(existing) = self
            .store
            .find(&request.task, round, &request.nonce)
            .await?
        {
            return duplicate_or_conflict(existing);
        }

        let identity = self.round_gate(&request.task, round).await?;
        let (inline, remote) =
            split_attachments(&request.attachments).map_err(AdmissionError::InvalidRequest)?;

        let mut task = request.into_task(round, inline, remote);
        task.identity = identity;
        let key = task.key();

        let permit = self.pool.try_reserve()?;
        match self.store.create(task).await {
            Ok(()) => {}
            Err(StoreError::Conflict { existing }) => return duplicate_or_conflict(*existing),
            Err(StoreError::InFlight { existing }) => {
                return Err(AdmissionError::in_progress(&existing));
            }
            Err(e) => return Err(e.into()),
        }
        permit.send(key.clone());
        info!(task = %key, "Task admitted");
        Ok(Admission::Accepted(key))
    }

    /// Round 2 may start only after round 1 completed; it inherits round 1's
    /// repository.
    async fn round_gate(
        &self,
        task_id: &str,
        round: Round,
    ) -> Result<Option<RepositoryIdentity>, AdmissionError> {
        let Some(previous) = round.previous() else {
            return Ok(None);
        };
        let not_ready = |reason: String| AdmissionError::RoundNotReady {
            task_id: task_id.to_string(),
            round,
            reason,
        };

        let prior = match self.store.get(task_id, previous).await {
            Ok(prior) => prior,
            Err(StoreError::NotFound(_)) => {
                return Err(not_ready(format!("round {previous} was never submitted")));
            }
            Err(e) => return Err(e.into()),
        };
        if prior.status != TaskStatus::Completed {
            return Err(not_ready(format!(
                "round {previous} is {} (nonce {})",
                prior.status, prior.nonce
            )));
        }
        Ok(prior
            .deployment
            .map(|d| d.identity)
            .or(prior.identity))
    }

    /// Latest attempt for a task-round.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when nothing was ever admitted for the key.
    pub async fn status(&self, task_id: &str, round: Round) -> Result<StatusReport, StoreError> {
        self.store.get(task_id, round).await.map(StatusReport::from)
    }

    /// Poll until the attempt identified by `nonce` is terminal.
    ///
    /// # Errors
    ///
    /// Propagates store errors; [`StoreError::NotFound`] if the attempt does
    /// not exist.
    pub async fn wait_for_terminal(
        &self,
        key: &TaskKey,
        nonce: &str,
        poll: Duration,
    ) -> Result<BuildTask, StoreError> {
        loop {
            let task = self
                .store
                .find(&key.task_id, key.round, nonce)
                .await?
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if task.is_terminal() {
                return Ok(task);
            }
            debug!(task = %key, status = %task.status, "Waiting for task");
            sleep(poll).await;
        }
    }

    /// Stop accepting work and wait for queued tasks to finish.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        info!("Orchestrator stopped");
    }
}

fn duplicate_or_conflict(existing: BuildTask) -> Result<Admission, AdmissionError> {
    if existing.is_terminal() {
        debug!(task = %existing.key(), nonce = %existing.nonce, "Duplicate of finished attempt");
        Ok(Admission::Duplicate(Box::new(existing)))
    } else {
        Err(AdmissionError::in_progress(&existing))
    }
}
