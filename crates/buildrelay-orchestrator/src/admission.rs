use buildrelay_store::StoreError;
use buildrelay_utils::error::{ErrorCategory, UserFriendlyError};
use buildrelay_utils::types::{BuildTask, Round, TaskKey, TaskStatus};
use thiserror::Error;

/// Result of a successful admission call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A new attempt was recorded and queued.
    Accepted(TaskKey),
    /// The triple already finished; this is its record. Nothing was queued.
    Duplicate(Box<BuildTask>),
}

impl Admission {
    #[must_use]
    pub fn key(&self) -> TaskKey {
        match self {
            Self::Accepted(key) => key.clone(),
            Self::Duplicate(task) => task.key(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("task {key} is already in progress under nonce {nonce} ({status})")]
    InProgress {
        key: TaskKey,
        nonce: String,
        status: TaskStatus,
    },

    #[error("round {round} of task {task_id} cannot start: {reason}")]
    RoundNotReady {
        task_id: String,
        round: Round,
        reason: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("work queue is full ({capacity} tasks waiting)")]
    Busy { capacity: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    pub(crate) fn in_progress(existing: &BuildTask) -> Self {
        Self::InProgress {
            key: existing.key(),
            nonce: existing.nonce.clone(),
            status: existing.status,
        }
    }
}

impl UserFriendlyError for AdmissionError {
    fn user_message(&self) -> String {
        match self {
            Self::Store(e) => e.user_message(),
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::RoundNotReady { .. } => Some(
                "Round 2 revises the repository built in round 1, so round 1 must have completed."
                    .to_string(),
            ),
            Self::InProgress { .. } => {
                Some("Only one attempt per task and round may run at a time.".to_string())
            }
            Self::Store(e) => e.context(),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InProgress { key, .. } => vec![format!(
                "Check progress with: buildrelay status {} --round {}",
                key.task_id, key.round
            )],
            Self::RoundNotReady { task_id, .. } => vec![
                format!("Check round 1 with: buildrelay status {task_id} --round 1"),
                "If round 1 failed, resubmit round 1 with a new nonce first".to_string(),
            ],
            Self::Busy { .. } => vec![
                "Retry shortly, or raise pipeline.queue_capacity".to_string(),
            ],
            Self::InvalidRequest(_) => {
                vec!["Fix the request file and submit again".to_string()]
            }
            Self::Store(e) => e.suggestions(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) => ErrorCategory::Storage,
            Self::InvalidRequest(_) => ErrorCategory::Validation,
            _ => ErrorCategory::Admission,
        }
    }
}
