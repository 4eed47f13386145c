use buildrelay_utils::error::{ErrorCategory, UserFriendlyError};
use buildrelay_utils::types::{BuildTask, TaskKey, TaskStatus};
use thiserror::Error;

/// Errors raised by a [`crate::TaskStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record for task {0}")]
    NotFound(TaskKey),

    /// The exact (task, round, nonce) triple is already recorded.
    #[error(
        "task {} nonce {} is already recorded ({})",
        existing.key(),
        existing.nonce,
        existing.status
    )]
    Conflict { existing: Box<BuildTask> },

    /// Another attempt for the same key is still running.
    #[error(
        "task {} is already in flight under nonce {} ({})",
        existing.key(),
        existing.nonce,
        existing.status
    )]
    InFlight { existing: Box<BuildTask> },

    #[error("illegal transition for task {key}: {from} -> {to}")]
    InvalidTransition {
        key: TaskKey,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt task record at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist task record: {0}")]
    Persist(String),

    #[error("state directory is not valid UTF-8: {0}")]
    InvalidPath(String),
}

impl StoreError {
    pub(crate) fn io(path: impl ToString, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl UserFriendlyError for StoreError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound(key) => format!("No record exists for task {key}"),
            Self::Conflict { existing } | Self::InFlight { existing } => {
                format!(
                    "Task {} already has an attempt with nonce '{}' in state {}",
                    existing.key(),
                    existing.nonce,
                    existing.status
                )
            }
            Self::InvalidTransition { key, from, to } => {
                format!("Task {key} cannot move from {from} to {to}")
            }
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Corrupt { .. } => {
                Some("A task record on disk could not be parsed as JSON.".to_string())
            }
            Self::InvalidTransition { .. } => {
                Some("Task records only move forward through the build pipeline.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound(_) => vec!["Check the task id and round number".to_string()],
            Self::InFlight { .. } => vec![
                "Wait for the running attempt to finish, then resubmit with a new nonce".to_string(),
            ],
            Self::Io { .. } | Self::Persist(_) => vec![
                "Check that the state directory exists and is writable".to_string(),
                "Set BUILDRELAY_HOME or --state-dir to a writable location".to_string(),
            ],
            Self::Corrupt { path, .. } => {
                vec![format!("Inspect or move aside {path} and rerun")]
            }
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}
