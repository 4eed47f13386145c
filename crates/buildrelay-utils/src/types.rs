//! Task model shared by every buildrelay crate.
//!
//! A [`BuildTask`] is the persisted record of one attempt at one round of one
//! task. The store owns these records; the orchestrator only ever holds a
//! working copy and writes it back on every transition.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString, IntoStaticStr};

/// Generated or published file contents keyed by repository-relative path.
///
/// A `BTreeMap` keeps iteration sorted, which makes digests and commits
/// deterministic.
pub type FileSet = BTreeMap<String, Vec<u8>>;

/// The two rounds a task goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Round {
    /// Round 1: the initial build.
    Initial,
    /// Round 2: a revision of the round-1 build.
    Revision,
}

impl Round {
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Initial => 1,
            Self::Revision => 2,
        }
    }

    /// The round that must complete before this one may be admitted.
    #[must_use]
    pub const fn previous(self) -> Option<Round> {
        match self {
            Self::Initial => None,
            Self::Revision => Some(Self::Initial),
        }
    }
}

impl TryFrom<u8> for Round {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Initial),
            2 => Ok(Self::Revision),
            other => Err(format!("round must be 1 or 2, got {other}")),
        }
    }
}

impl From<Round> for u8 {
    fn from(round: Round) -> Self {
        round.number()
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Store key: every read and write of a task record goes through one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub task_id: String,
    pub round: Round,
}

impl TaskKey {
    #[must_use]
    pub fn new(task_id: impl Into<String>, round: Round) -> Self {
        Self {
            task_id: task_id.into(),
            round,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#r{}", self.task_id, self.round)
    }
}

/// Lifecycle state of a task-round.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Generating,
    Publishing,
    Notifying,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// The happy path is strictly linear. Any non-terminal state may fail,
    /// which covers both stage failures and crash recovery. Terminal states
    /// never move.
    #[must_use]
    pub const fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Generating)
            | (Self::Generating, Self::Publishing)
            | (Self::Publishing, Self::Notifying)
            | (Self::Notifying, Self::Completed) => true,
            (current, Self::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// How a failure should be handled by the stage that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// Absorbed by retry or fallback inside the stage.
    Transient,
    /// Skips to the next provider, or fails the stage outright.
    Permanent,
    /// Every retry and fallback was exhausted.
    Escalated,
}

/// Pipeline stage in which a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureStage {
    Admission,
    Generating,
    Publishing,
    Recovery,
}

/// Per-provider record of a failed generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttemptSummary {
    pub provider: String,
    pub attempts: u32,
    pub terminal_kind: String,
    pub message: String,
}

/// Persisted description of why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub stage: FailureStage,
    pub class: ErrorClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderAttemptSummary>,
}

impl FailureDescriptor {
    #[must_use]
    pub fn new(stage: FailureStage, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            stage,
            class,
            message: message.into(),
            providers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_providers(mut self, providers: Vec<ProviderAttemptSummary>) -> Self {
        self.providers = providers;
        self
    }
}

/// Repository a task publishes into. Round 2 reuses round 1's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    pub owner: String,
    pub name: String,
}

impl RepositoryIdentity {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Where a round ended up after publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub identity: RepositoryIdentity,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// Which provider produced the code, and what it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub provider: String,
    pub model: String,
    pub attempts: u32,
    pub file_count: usize,
    pub files_digest: String,
}

/// Decoded request attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    #[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
    pub data: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.media_type.starts_with("text/")
            || matches!(
                self.media_type.as_str(),
                "application/json" | "application/javascript" | "application/xml"
            )
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.data)
    }
}

/// Attachment given by URL, fetched when the task is picked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    pub name: String,
    pub url: String,
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Persisted record of one attempt at one task-round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTask {
    pub task_id: String,
    pub round: Round,
    pub nonce: String,
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Fetched by the worker before generation starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_attachments: Vec<RemoteAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_url: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Repository to publish into. Round 2 inherits round 1's at admission;
    /// round 1 resolves it when publishing starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<RepositoryIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeSummary>,
}

impl BuildTask {
    /// A fresh `Pending` record.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        round: Round,
        nonce: impl Into<String>,
        brief: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            round,
            nonce: nonce.into(),
            brief: brief.into(),
            checks: Vec::new(),
            email: None,
            attachments: Vec::new(),
            remote_attachments: Vec::new(),
            evaluation_url: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
            warnings: Vec::new(),
            identity: None,
            deployment: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_id.clone(), self.round)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this record is the attempt identified by `nonce`.
    #[must_use]
    pub fn matches_nonce(&self, nonce: &str) -> bool {
        self.nonce == nonce
    }
}

/// BLAKE3 digest over a file set, independent of insertion order.
///
/// Each entry contributes its path length, path, content length, and
/// content, so `{"ab": "c"}` and `{"a": "bc"}` hash differently.
#[must_use]
pub fn files_digest(files: &FileSet) -> String {
    let mut hasher = blake3::Hasher::new();
    for (path, content) in files {
        hasher.update(&(path.len() as u64).to_le_bytes());
        hasher.update(path.as_bytes());
        hasher.update(&(content.len() as u64).to_le_bytes());
        hasher.update(content);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Round::Revision).unwrap(), "2");
        let round: Round = serde_json::from_str("1").unwrap();
        assert_eq!(round, Round::Initial);
        assert!(serde_json::from_str::<Round>("3").is_err());
    }

    #[test]
    fn only_revision_has_a_previous_round() {
        assert_eq!(Round::Initial.previous(), None);
        assert_eq!(Round::Revision.previous(), Some(Round::Initial));
    }

    #[test]
    fn happy_path_transitions_are_linear() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Publishing));
        assert!(Publishing.can_transition_to(Notifying));
        assert!(Notifying.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Publishing));
        assert!(!Generating.can_transition_to(Completed));
        assert!(!Publishing.can_transition_to(Generating));
    }

    #[test]
    fn terminal_states_never_move() {
        use TaskStatus::*;
        for next in [Pending, Generating, Publishing, Notifying, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        for live in [Pending, Generating, Publishing, Notifying] {
            assert!(live.can_transition_to(Failed));
        }
    }

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Generating).unwrap(),
            "\"generating\""
        );
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn attachment_data_is_persisted_as_base64() {
        let attachment = Attachment {
            name: "sample.txt".into(),
            media_type: "text/plain".into(),
            data: b"hello".to_vec(),
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["data"], "aGVsbG8=");
        let back: Attachment = serde_json::from_value(json).unwrap();
        assert_eq!(back, attachment);
        assert!(back.is_text());
        assert!(!back.is_image());
    }

    #[test]
    fn build_task_round_trips_through_json() {
        let mut task = BuildTask::new("captcha-solver", Round::Initial, "n-1", "Build a solver");
        task.checks = vec!["Page has a title".into()];
        task.warnings.push("pages not live".into());
        let json = serde_json::to_string(&task).unwrap();
        let back: BuildTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.key(), TaskKey::new("captcha-solver", Round::Initial));
    }

    #[test]
    fn digest_ignores_insertion_order_but_not_boundaries() {
        let mut a = FileSet::new();
        a.insert("index.html".into(), b"<html>".to_vec());
        a.insert("app.js".into(), b"run()".to_vec());
        let mut b = FileSet::new();
        b.insert("app.js".into(), b"run()".to_vec());
        b.insert("index.html".into(), b"<html>".to_vec());
        assert_eq!(files_digest(&a), files_digest(&b));

        let mut c = FileSet::new();
        c.insert("ab".into(), b"c".to_vec());
        let mut d = FileSet::new();
        d.insert("a".into(), b"bc".to_vec());
        assert_ne!(files_digest(&c), files_digest(&d));
    }

    #[test]
    fn task_key_display_names_the_round() {
        assert_eq!(
            TaskKey::new("t1", Round::Revision).to_string(),
            "t1#r2"
        );
    }
}
