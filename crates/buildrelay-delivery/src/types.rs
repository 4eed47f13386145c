use async_trait::async_trait;
use buildrelay_utils::types::{BuildTask, FileSet, RepositoryIdentity, Round};
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Where a publish landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    /// Non-fatal problems, such as Pages failing to enable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PublishFailureKind {
    RateLimited,
    Timeout,
    ServerError,
    Network,
    Unauthorized,
    NotFound,
    Rejected,
}

impl PublishFailureKind {
    /// Transient kinds are retried by the publishing stage.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::ServerError | Self::Network
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PublishFailure {
    pub kind: PublishFailureKind,
    pub message: String,
}

impl PublishFailure {
    #[must_use]
    pub fn new(kind: PublishFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Source-control host that receives generated files.
#[async_trait]
pub trait RepositoryPublisher: Send + Sync {
    /// Repository a task's round 1 should publish to.
    async fn identity_for(&self, task: &BuildTask) -> Result<RepositoryIdentity, PublishFailure>;

    /// Create the repository if needed, commit `files` as one commit, and
    /// make sure static hosting is enabled.
    async fn publish(
        &self,
        identity: &RepositoryIdentity,
        files: &FileSet,
        round: Round,
    ) -> Result<PublishReceipt, PublishFailure>;

    /// Current contents of the repository's default branch.
    async fn fetch_files(&self, identity: &RepositoryIdentity) -> Result<FileSet, PublishFailure>;

    /// Block until `pages_url` serves content or the configured wait runs out.
    async fn wait_until_live(&self, pages_url: &str) -> Result<(), PublishFailure>;
}

/// Body of the evaluation callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationPayload {
    pub email: Option<String>,
    pub task: String,
    pub round: Round,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("evaluation callback failed after {attempts} attempt(s): {message}")]
pub struct NotifyFailure {
    pub attempts: u32,
    pub last_status: Option<u16>,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &EvaluationPayload) -> Result<(), NotifyFailure>;
}
