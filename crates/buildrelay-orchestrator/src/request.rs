use buildrelay_utils::types::{Attachment, BuildTask, RemoteAttachment, Round};
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionError;

/// An authenticated build request as handed to admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(default)]
    pub email: Option<String>,
    pub task: String,
    pub round: u8,
    pub nonce: String,
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub evaluation_url: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// Attachment as it arrives: a name plus a data URI or fetchable URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub url: String,
}

impl BuildRequest {
    /// The validated round.
    ///
    /// # Errors
    ///
    /// Any value other than 1 or 2 is an invalid request.
    pub fn round(&self) -> Result<Round, AdmissionError> {
        Round::try_from(self.round).map_err(AdmissionError::InvalidRequest)
    }

    pub(crate) fn validate(&self) -> Result<Round, AdmissionError> {
        for (field, value) in [
            ("task", &self.task),
            ("nonce", &self.nonce),
            ("brief", &self.brief),
        ] {
            if value.trim().is_empty() {
                return Err(AdmissionError::InvalidRequest(format!(
                    "{field} must not be empty"
                )));
            }
        }
        if let Some(url) = &self.evaluation_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(AdmissionError::InvalidRequest(format!(
                "evaluation_url must be an http(s) URL, got '{url}'"
            )));
        }
        self.round()
    }

    /// Build the Pending record for this request.
    pub(crate) fn into_task(
        self,
        round: Round,
        attachments: Vec<Attachment>,
        remote_attachments: Vec<RemoteAttachment>,
    ) -> BuildTask {
        let mut task = BuildTask::new(self.task, round, self.nonce, self.brief);
        task.checks = self.checks;
        task.email = self.email;
        task.evaluation_url = self.evaluation_url;
        task.attachments = attachments;
        task.remote_attachments = remote_attachments;
        task
    }
}
