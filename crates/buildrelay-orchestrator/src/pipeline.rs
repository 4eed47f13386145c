//! The per-task state machine
//!
//! Pending -> Generating -> Publishing -> Notifying -> Completed, with any
//! non-terminal stage able to fall to Failed. Every transition is written
//! through the store before the next stage starts.

use std::sync::Arc;
use std::time::Duration;

use buildrelay_config::PipelineConfig;
use buildrelay_delivery::{
    EvaluationPayload, Notifier, PublishFailure, PublishFailureKind, RepositoryPublisher,
};
use buildrelay_llm::{FallbackSelector, GenerationRequest};
use buildrelay_store::{StoreError, TaskStore, TransitionFields};
use buildrelay_utils::logging::{log_call_failure, log_transition, task_span};
use buildrelay_utils::types::{
    Attachment, BuildTask, Deployment, ErrorClass, FailureDescriptor, FailureStage, FileSet,
    OutcomeSummary, Round, TaskKey, TaskStatus, files_digest,
};
use tokio::time::{sleep, timeout};
use tracing::{Instrument, error, info, warn};

use crate::attachments::AttachmentResolver;
use crate::scaffold::finalize_files;

/// Retry settings for the publishing stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPolicy {
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Cap on one publish call, which spans many API requests.
    pub call_timeout: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl PublishPolicy {
    #[must_use]
    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self {
            attempts: pipeline.publish_attempts().max(1),
            backoff: pipeline.publish_backoff(),
            call_timeout: pipeline.publish_timeout(),
        }
    }
}

pub(crate) struct Pipeline {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) selector: Arc<FallbackSelector>,
    pub(crate) publisher: Arc<dyn RepositoryPublisher>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) attachments: AttachmentResolver,
    pub(crate) publish: PublishPolicy,
}

/// Why a stage stopped the pipeline.
enum Halt {
    Failed(FailureDescriptor, Vec<String>),
    Store(StoreError),
}

impl From<StoreError> for Halt {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl Pipeline {
    /// Drive one queued key to a terminal state.
    pub(crate) async fn run(&self, key: &TaskKey) {
        let task = match self.store.get(&key.task_id, key.round).await {
            Ok(task) => task,
            Err(e) => {
                error!(task = %key, error = %e, "Queued task could not be loaded");
                return;
            }
        };
        if task.status != TaskStatus::Pending {
            warn!(task = %key, status = %task.status, "Queued task is not pending, skipping");
            return;
        }

        let span = task_span(key, &task.nonce);
        async {
            match self.execute(task).await {
                Ok(done) => info!(status = %done.status, "Task finished"),
                Err(Halt::Failed(descriptor, warnings)) => {
                    warn!(stage = ?descriptor.stage, class = %descriptor.class, error = %descriptor.message, "Task failed");
                    let fields = TransitionFields::failed(descriptor).with_warnings(warnings);
                    if let Err(e) = self.advance(key, TaskStatus::Failed, fields).await {
                        error!(error = %e, "Could not record task failure");
                    }
                }
                Err(Halt::Store(e)) => {
                    error!(error = %e, "Store write failed mid-pipeline; task left for recovery");
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn advance(
        &self,
        key: &TaskKey,
        to: TaskStatus,
        fields: TransitionFields,
    ) -> Result<BuildTask, StoreError> {
        self.store
            .transition(&key.task_id, key.round, to, fields)
            .await
    }

    async fn step(
        &self,
        task: &BuildTask,
        to: TaskStatus,
        fields: TransitionFields,
    ) -> Result<BuildTask, StoreError> {
        let key = task.key();
        let updated = self.advance(&key, to, fields).await?;
        log_transition(&key, task.status, to);
        Ok(updated)
    }

    async fn execute(&self, task: BuildTask) -> Result<BuildTask, Halt> {
        let key = task.key();
        let attachments = self.gather_attachments(&task).await?;
        let task = self
            .step(&task, TaskStatus::Generating, TransitionFields::default())
            .await?;

        // Generating
        let mut warnings = Vec::new();
        let existing = self.current_files(&task, &mut warnings).await;
        let mut request = GenerationRequest::new(task.task_id.clone(), task.round, task.brief.clone());
        request.checks = task.checks.clone();
        request.attachments = attachments;
        request.existing_files = existing.clone();

        let generated = match self.selector.generate(&request).await {
            Ok(generated) => generated,
            Err(aggregate) => {
                let descriptor = FailureDescriptor::new(
                    FailureStage::Generating,
                    ErrorClass::Escalated,
                    aggregate.to_string(),
                )
                .with_providers(aggregate.summaries());
                return Err(Halt::Failed(descriptor, warnings));
            }
        };
        let attempts = generated.attempts
            + generated
                .failed_providers
                .iter()
                .map(|p| p.attempts)
                .sum::<u32>();
        let files = finalize_files(&task, generated.files, &existing);
        let outcome = OutcomeSummary {
            provider: generated.provider,
            model: generated.model,
            attempts,
            file_count: files.len(),
            files_digest: files_digest(&files),
        };

        let task = self
            .step(
                &task,
                TaskStatus::Publishing,
                TransitionFields::default()
                    .with_outcome(outcome)
                    .with_warnings(warnings),
            )
            .await?;

        // Publishing
        let identity = match task.identity.clone() {
            Some(identity) => identity,
            None => {
                self.retry_publishing(&key, "identity", || self.publisher.identity_for(&task))
                    .await?
            }
        };
        let receipt = self
            .retry_publishing(&key, "publish", || {
                self.publisher.publish(&identity, &files, key.round)
            })
            .await?;
        info!(
            repo = %identity.full_name(),
            commit = %receipt.commit_sha,
            "Published"
        );
        let deployment = Deployment {
            identity,
            repo_url: receipt.repo_url,
            commit_sha: receipt.commit_sha,
            pages_url: receipt.pages_url,
        };
        let task = self
            .step(
                &task,
                TaskStatus::Notifying,
                TransitionFields::default()
                    .with_deployment(deployment.clone())
                    .with_warnings(receipt.warnings),
            )
            .await?;

        // Notifying
        let warnings = self.notify(&task, &deployment).await;
        let task = self
            .step(
                &task,
                TaskStatus::Completed,
                TransitionFields::default().with_warnings(warnings),
            )
            .await?;
        Ok(task)
    }

    /// Round 2 sees what round 1 published. A fetch failure only costs
    /// context, so it becomes a warning.
    async fn current_files(&self, task: &BuildTask, warnings: &mut Vec<String>) -> FileSet {
        let (Round::Revision, Some(identity)) = (task.round, task.identity.as_ref()) else {
            return FileSet::new();
        };
        match self.publisher.fetch_files(identity).await {
            Ok(files) => files,
            Err(e) => {
                log_call_failure(&task.key(), "repository fetch", 1, &e.message);
                warnings.push(format!("could not fetch current repository files: {e}"));
                FileSet::new()
            }
        }
    }

    /// Run one publishing-stage call under the publish policy.
    ///
    /// Each attempt is capped by the call timeout. Transient failures are
    /// retried after the backoff; anything else fails the task at once.
    /// Inline attachments followed by the fetched URL ones.
    async fn gather_attachments(&self, task: &BuildTask) -> Result<Vec<Attachment>, Halt> {
        let mut attachments = task.attachments.clone();
        if task.remote_attachments.is_empty() {
            return Ok(attachments);
        }
        match self.attachments.fetch_all(&task.remote_attachments).await {
            Ok(fetched) => {
                attachments.extend(fetched);
                Ok(attachments)
            }
            Err(message) => {
                log_call_failure(&task.key(), "attachment fetch", 1, &message);
                let descriptor =
                    FailureDescriptor::new(FailureStage::Admission, ErrorClass::Permanent, message);
                Err(Halt::Failed(descriptor, Vec::new()))
            }
        }
    }

    async fn retry_publishing<T, F, Fut>(
        &self,
        key: &TaskKey,
        label: &str,
        mut call: F,
    ) -> Result<T, Halt>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PublishFailure>>,
    {
        let policy = &self.publish;
        let mut last = PublishFailure::new(PublishFailureKind::Timeout, "not attempted");

        for attempt in 0..policy.attempts {
            let result = timeout(policy.call_timeout, call()).await.unwrap_or_else(|_| {
                Err(PublishFailure::new(
                    PublishFailureKind::Timeout,
                    format!(
                        "{label} did not finish within {}s",
                        policy.call_timeout.as_secs()
                    ),
                ))
            });

            match result {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    log_call_failure(key, label, attempt + 1, &failure.to_string());
                    if !failure.kind.is_transient() {
                        return Err(Halt::Failed(
                            publish_descriptor(&failure, ErrorClass::Permanent),
                            Vec::new(),
                        ));
                    }
                    last = failure;
                    if attempt + 1 < policy.attempts {
                        sleep(policy.backoff).await;
                    }
                }
            }
        }

        let descriptor = FailureDescriptor::new(
            FailureStage::Publishing,
            ErrorClass::Escalated,
            format!("{label} failed after {} attempt(s): {last}", policy.attempts),
        );
        Err(Halt::Failed(descriptor, Vec::new()))
    }

    /// Wait for the site and call back. Neither can fail the task.
    async fn notify(&self, task: &BuildTask, deployment: &Deployment) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(url) = task.evaluation_url.as_deref() else {
            return warnings;
        };

        if let Err(e) = self.publisher.wait_until_live(&deployment.pages_url).await {
            warnings.push(format!("site not confirmed live before notifying: {e}"));
        }

        let payload = EvaluationPayload {
            email: task.email.clone(),
            task: task.task_id.clone(),
            round: task.round,
            nonce: task.nonce.clone(),
            repo_url: deployment.repo_url.clone(),
            commit_sha: deployment.commit_sha.clone(),
            pages_url: deployment.pages_url.clone(),
        };
        if let Err(e) = self.notifier.notify(url, &payload).await {
            log_call_failure(&task.key(), "notifier", e.attempts, &e.message);
            warnings.push(e.to_string());
        }
        warnings
    }
}

fn publish_descriptor(failure: &PublishFailure, class: ErrorClass) -> FailureDescriptor {
    FailureDescriptor::new(FailureStage::Publishing, class, failure.to_string())
}
