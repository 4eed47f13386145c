//! Core types for the provider abstraction

use std::time::Duration;

use async_trait::async_trait;
use buildrelay_utils::types::{Attachment, ErrorClass, FileSet, Round};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// The LLM vendors buildrelay can talk to.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    OpenRouter,
    Anthropic,
    OpenAi,
    Gemini,
}

impl ProviderKind {
    /// Config-facing name, e.g. `"openrouter"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Environment variable holding the API key unless the config names another.
    #[must_use]
    pub const fn default_api_key_env(self) -> &'static str {
        match self {
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenRouter => "anthropic/claude-opus-4.1",
            Self::Anthropic => "claude-opus-4-1",
            Self::OpenAi => "gpt-5",
            Self::Gemini => "gemini-2.5-pro",
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Gemini => {
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
            }
        }
    }
}

/// Why a single provider call failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Timeout,
    InvalidCredentials,
    ContentRejected,
    ServerError,
    MalformedOutput,
    InvalidRequest,
    BudgetExhausted,
}

impl FailureKind {
    /// Transient kinds are retried against the same provider.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::ServerError | Self::MalformedOutput
        )
    }

    #[must_use]
    pub const fn class(self) -> ErrorClass {
        if self.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Typed failure returned by a [`ProviderAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no response within {}s", after.as_secs_f64()),
        )
    }

    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedOutput, message)
    }
}

/// Everything a provider needs to generate one round's code.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task_id: String,
    pub round: Round,
    pub brief: String,
    pub checks: Vec<String>,
    pub attachments: Vec<Attachment>,
    /// Current repository contents; empty for round 1.
    pub existing_files: FileSet,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(task_id: impl Into<String>, round: Round, brief: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            round,
            brief: brief.into(),
            checks: Vec::new(),
            attachments: Vec::new(),
            existing_files: FileSet::new(),
        }
    }
}

/// Successful adapter output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub files: FileSet,
    pub model: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
}

impl GeneratedCode {
    #[must_use]
    pub fn new(files: FileSet, model: impl Into<String>) -> Self {
        Self {
            files,
            model: model.into(),
            tokens_input: None,
            tokens_output: None,
        }
    }
}

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Image sent alongside the user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub name: String,
    pub media_type: String,
    pub base64: String,
}

impl ImagePart {
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64)
    }
}

/// Vendor-neutral prompt; each adapter renders it into its wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub images: Vec<ImagePart>,
}

/// One LLM vendor behind a uniform interface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Name recorded in outcomes and failure summaries.
    fn name(&self) -> &str;

    /// Generate the file set for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ProviderFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provider_kind_names_round_trip() {
        for kind in [
            ProviderKind::OpenRouter,
            ProviderKind::Anthropic,
            ProviderKind::OpenAi,
            ProviderKind::Gemini,
        ] {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(ProviderKind::OpenAi.as_str(), "openai");
        assert_eq!(ProviderKind::from_str("OpenRouter").unwrap(), ProviderKind::OpenRouter);
        assert!(ProviderKind::from_str("mistral").is_err());
    }

    #[test]
    fn transient_kinds_match_retry_policy() {
        let transient = [
            FailureKind::RateLimited,
            FailureKind::Timeout,
            FailureKind::ServerError,
            FailureKind::MalformedOutput,
        ];
        let permanent = [
            FailureKind::InvalidCredentials,
            FailureKind::ContentRejected,
            FailureKind::InvalidRequest,
            FailureKind::BudgetExhausted,
        ];
        for kind in transient {
            assert!(kind.is_transient(), "{kind} should be transient");
            assert_eq!(kind.class(), ErrorClass::Transient);
        }
        for kind in permanent {
            assert!(!kind.is_transient(), "{kind} should be permanent");
            assert_eq!(kind.class(), ErrorClass::Permanent);
        }
    }

    #[test]
    fn failure_display_names_the_kind() {
        let failure = ProviderFailure::new(FailureKind::RateLimited, "429 from upstream");
        assert_eq!(failure.to_string(), "rate_limited: 429 from upstream");
    }
}
