use buildrelay_utils::types::{
    BuildTask, Deployment, FailureDescriptor, OutcomeSummary, Round, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What a status query returns.
///
/// The outcome fields appear only once the attempt is terminal: deployment
/// and outcome for Completed, `last_error` for Failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub task_id: String,
    pub round: Round,
    pub nonce: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureDescriptor>,
}

impl From<BuildTask> for StatusReport {
    fn from(task: BuildTask) -> Self {
        let completed = task.status == TaskStatus::Completed;
        Self {
            task_id: task.task_id,
            round: task.round,
            nonce: task.nonce,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            warnings: task.warnings,
            deployment: task.deployment.filter(|_| completed),
            outcome: task.outcome.filter(|_| completed),
            last_error: task.last_error,
        }
    }
}

impl StatusReport {
    /// One line for terminal output.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!("{}#r{} [{}] {}", self.task_id, self.round, self.nonce, self.status);
        if let Some(deployment) = &self.deployment {
            line.push_str(&format!(" {}", deployment.pages_url));
        }
        if let Some(error) = &self.last_error {
            line.push_str(&format!(": {}", error.message));
        }
        if !self.warnings.is_empty() {
            line.push_str(&format!(" ({} warning(s))", self.warnings.len()));
        }
        line
    }
}
