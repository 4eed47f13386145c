use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Provider names accepted in `providers.order`.
pub const KNOWN_PROVIDERS: &[&str] = &["openrouter", "anthropic", "openai", "gemini"];

/// Store backends accepted in `store.backend`.
pub const KNOWN_BACKENDS: &[&str] = &["file", "memory"];

/// Effective configuration after merging defaults, file, environment, and CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub providers: ProvidersConfig,
    pub github: GithubConfig,
    pub notify: NotifyConfig,
    pub store: StoreConfig,
    pub source_attribution: HashMap<String, ConfigSource>,
}

/// Worker pool, retry, and timeout settings.
///
/// ```toml
/// [pipeline]
/// workers = 4
/// queue_capacity = 64
/// provider_timeout_secs = 120
/// stage_deadline_secs = 1800
/// max_attempts = 3
/// backoff_base_ms = 2000
/// backoff_max_ms = 10000
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub provider_timeout_secs: Option<u64>,
    pub stage_deadline_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub publish_attempts: Option<u32>,
    pub publish_backoff_ms: Option<u64>,
    pub publish_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: Some(4),
            queue_capacity: Some(64),
            provider_timeout_secs: Some(120),
            stage_deadline_secs: Some(1800),
            max_attempts: Some(3),
            backoff_base_ms: Some(2_000),
            backoff_max_ms: Some(10_000),
            publish_attempts: Some(3),
            publish_backoff_ms: Some(5_000),
            publish_timeout_secs: Some(120),
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(4)
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(64)
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.unwrap_or(120))
    }

    #[must_use]
    pub fn stage_deadline(&self) -> Duration {
        Duration::from_secs(self.stage_deadline_secs.unwrap_or(1800))
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms.unwrap_or(2_000))
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.unwrap_or(10_000))
    }

    #[must_use]
    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.unwrap_or(3)
    }

    #[must_use]
    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms.unwrap_or(5_000))
    }

    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs.unwrap_or(120))
    }
}

/// Provider preference order plus per-provider settings.
///
/// ```toml
/// [providers]
/// order = ["openrouter", "anthropic"]
///
/// [providers.openrouter]
/// model = "anthropic/claude-opus-4.1"
/// budget = 20
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    pub order: Option<Vec<String>>,
    pub openrouter: Option<ProviderSettings>,
    pub anthropic: Option<ProviderSettings>,
    pub openai: Option<ProviderSettings>,
    pub gemini: Option<ProviderSettings>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: Some(KNOWN_PROVIDERS.iter().map(|p| (*p).to_string()).collect()),
            openrouter: None,
            anthropic: None,
            openai: None,
            gemini: None,
        }
    }
}

impl ProvidersConfig {
    #[must_use]
    pub fn order(&self) -> Vec<String> {
        self.order.clone().unwrap_or_default()
    }

    /// Settings block for a provider by its config name.
    #[must_use]
    pub fn settings(&self, name: &str) -> Option<&ProviderSettings> {
        match name {
            "openrouter" => self.openrouter.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            "openai" => self.openai.as_ref(),
            "gemini" => self.gemini.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn settings_mut(&mut self, name: &str) -> Option<&mut Option<ProviderSettings>> {
        match name {
            "openrouter" => Some(&mut self.openrouter),
            "anthropic" => Some(&mut self.anthropic),
            "openai" => Some(&mut self.openai),
            "gemini" => Some(&mut self.gemini),
            _ => None,
        }
    }
}

/// Per-provider overrides. Unset fields fall back to the adapter's defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProviderSettings {
    /// Environment variable holding the API key. Keys never live in the file.
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Maximum calls per process; unset means unmetered.
    pub budget: Option<u32>,
}

impl ProviderSettings {
    /// Overlay `other` onto `self`, field by field.
    pub(crate) fn overlay(&mut self, other: ProviderSettings) {
        if other.api_key_env.is_some() {
            self.api_key_env = other.api_key_env;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.max_tokens.is_some() {
            self.max_tokens = other.max_tokens;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.budget.is_some() {
            self.budget = other.budget;
        }
    }
}

/// GitHub publishing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubConfig {
    pub token_env: Option<String>,
    pub owner: Option<String>,
    pub api_base_url: Option<String>,
    pub pages_wait_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: Some("GITHUB_TOKEN".to_string()),
            owner: None,
            api_base_url: Some("https://api.github.com".to_string()),
            pages_wait_secs: Some(120),
            request_timeout_secs: Some(30),
        }
    }
}

impl GithubConfig {
    #[must_use]
    pub fn token_env(&self) -> &str {
        self.token_env.as_deref().unwrap_or("GITHUB_TOKEN")
    }

    #[must_use]
    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.github.com")
    }

    #[must_use]
    pub fn pages_wait(&self) -> Duration {
        Duration::from_secs(self.pages_wait_secs.unwrap_or(120))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(30))
    }
}

/// Evaluation callback settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    pub attempts: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            attempts: Some(5),
            timeout_secs: Some(30),
            backoff_base_ms: Some(1_000),
            backoff_max_ms: Some(8_000),
        }
    }
}

impl NotifyConfig {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.unwrap_or(5)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(30))
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms.unwrap_or(1_000))
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.unwrap_or(8_000))
    }
}

/// Task store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub backend: Option<String>,
    pub state_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Some("file".to_string()),
            state_dir: None,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn backend(&self) -> &str {
        self.backend.as_deref().unwrap_or("file")
    }
}

/// Source of a configuration value for attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env(String),
    ConfigFile(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Env(var) => write!(f, "env ({var})"),
            Self::ConfigFile(path) => write!(f, "config file ({})", path.display()),
            Self::Defaults => write!(f, "defaults"),
        }
    }
}

/// CLI arguments for configuration override
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub provider_order: Option<Vec<String>>,
    pub state_dir: Option<PathBuf>,
    pub store_backend: Option<String>,
}
