use std::collections::HashMap;
use std::path::{Path, PathBuf};

use buildrelay_utils::error::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
    CliArgs, Config, ConfigSource, GithubConfig, NotifyConfig, PipelineConfig, ProviderSettings,
    ProvidersConfig, StoreConfig,
};

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlConfig {
    pipeline: Option<PipelineConfig>,
    providers: Option<TomlProviders>,
    github: Option<GithubConfig>,
    notify: Option<NotifyConfig>,
    store: Option<StoreConfig>,
}

/// `[providers]` as written in the file; every field optional.
#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlProviders {
    order: Option<Vec<String>>,
    openrouter: Option<ProviderSettings>,
    anthropic: Option<ProviderSettings>,
    openai: Option<ProviderSettings>,
    gemini: Option<ProviderSettings>,
}

/// Copy `$from.$field` into `$into.$field` when set and record where it came from.
macro_rules! merge_field {
    ($into:expr, $from:expr, $section:literal, $field:ident, $source:expr, $attr:expr) => {
        if $from.$field.is_some() {
            $into.$field = $from.$field;
            $attr.insert(
                concat!($section, ".", stringify!($field)).to_string(),
                $source.clone(),
            );
        }
    };
}

impl Config {
    /// Built-in defaults only; no file, environment, or CLI input.
    #[must_use]
    pub fn defaults() -> Self {
        let mut store = StoreConfig::default();
        store.state_dir = Some(default_state_dir(None));
        Self {
            pipeline: PipelineConfig::default(),
            providers: ProvidersConfig::default(),
            github: GithubConfig::default(),
            notify: NotifyConfig::default(),
            store,
            source_attribution: HashMap::new(),
        }
    }

    /// Discover and load configuration with precedence: CLI > env > file > defaults
    ///
    /// Uses the current working directory for config file discovery when no
    /// explicit path is provided in `cli_args`.
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::NotFound {
            path: format!("current directory ({e})"),
        })?;
        Self::discover_from(&start_dir, cli_args, &|key| std::env::var(key).ok())
    }

    /// Path- and env-driven variant used by tests to avoid process-global state.
    pub fn discover_from(
        start_dir: &Path,
        cli_args: &CliArgs,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut attribution: HashMap<String, ConfigSource> = HashMap::new();
        let mut config = Self::defaults();
        config.store.state_dir = None;

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        if let Some(path) = &config_path {
            debug!(path = %path.display(), "Loading configuration file");
            let file_config = load_config_file(path)?;
            let source = ConfigSource::ConfigFile(path.clone());
            config.apply_file(file_config, &source, &mut attribution);
        }

        config.apply_env(env, &mut attribution)?;
        config.apply_cli(cli_args, &mut attribution);

        if config.store.state_dir.is_none() {
            let home = env("BUILDRELAY_HOME");
            if home.is_some() {
                attribution.insert(
                    "store.state_dir".to_string(),
                    ConfigSource::Env("BUILDRELAY_HOME".to_string()),
                );
            }
            config.store.state_dir = Some(default_state_dir(home));
        }

        config.source_attribution = attribution;
        config.validate()?;
        Ok(config)
    }

    /// Walk up from `start_dir` looking for `.buildrelay/config.toml`, stopping
    /// at a repository root marker or the filesystem root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            let candidate = dir.join(".buildrelay").join("config.toml");
            if candidate.is_file() {
                return Some(candidate);
            }
            if dir.join(".git").exists() || dir.join(".hg").exists() {
                break;
            }
            current = dir.parent();
        }
        None
    }

    fn apply_file(
        &mut self,
        file: TomlConfig,
        source: &ConfigSource,
        attr: &mut HashMap<String, ConfigSource>,
    ) {
        if let Some(p) = file.pipeline {
            let into = &mut self.pipeline;
            merge_field!(into, p, "pipeline", workers, source, attr);
            merge_field!(into, p, "pipeline", queue_capacity, source, attr);
            merge_field!(into, p, "pipeline", provider_timeout_secs, source, attr);
            merge_field!(into, p, "pipeline", stage_deadline_secs, source, attr);
            merge_field!(into, p, "pipeline", max_attempts, source, attr);
            merge_field!(into, p, "pipeline", backoff_base_ms, source, attr);
            merge_field!(into, p, "pipeline", backoff_max_ms, source, attr);
            merge_field!(into, p, "pipeline", publish_attempts, source, attr);
            merge_field!(into, p, "pipeline", publish_backoff_ms, source, attr);
            merge_field!(into, p, "pipeline", publish_timeout_secs, source, attr);
        }

        if let Some(p) = file.providers {
            let into = &mut self.providers;
            merge_field!(into, p, "providers", order, source, attr);
            let blocks = [
                ("openrouter", p.openrouter),
                ("anthropic", p.anthropic),
                ("openai", p.openai),
                ("gemini", p.gemini),
            ];
            for (name, block) in blocks {
                let Some(block) = block else { continue };
                if let Some(slot) = self.providers.settings_mut(name) {
                    slot.get_or_insert_with(ProviderSettings::default)
                        .overlay(block);
                    attr.insert(format!("providers.{name}"), source.clone());
                }
            }
        }

        if let Some(g) = file.github {
            let into = &mut self.github;
            merge_field!(into, g, "github", token_env, source, attr);
            merge_field!(into, g, "github", owner, source, attr);
            merge_field!(into, g, "github", api_base_url, source, attr);
            merge_field!(into, g, "github", pages_wait_secs, source, attr);
            merge_field!(into, g, "github", request_timeout_secs, source, attr);
        }

        if let Some(n) = file.notify {
            let into = &mut self.notify;
            merge_field!(into, n, "notify", attempts, source, attr);
            merge_field!(into, n, "notify", timeout_secs, source, attr);
            merge_field!(into, n, "notify", backoff_base_ms, source, attr);
            merge_field!(into, n, "notify", backoff_max_ms, source, attr);
        }

        if let Some(s) = file.store {
            let into = &mut self.store;
            merge_field!(into, s, "store", backend, source, attr);
            merge_field!(into, s, "store", state_dir, source, attr);
        }
    }

    fn apply_env(
        &mut self,
        env: &dyn Fn(&str) -> Option<String>,
        attr: &mut HashMap<String, ConfigSource>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = env("BUILDRELAY_WORKERS") {
            let workers = raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "BUILDRELAY_WORKERS".to_string(),
                value: raw.clone(),
            })?;
            self.pipeline.workers = Some(workers);
            attr.insert(
                "pipeline.workers".to_string(),
                ConfigSource::Env("BUILDRELAY_WORKERS".to_string()),
            );
        }

        if let Some(raw) = env("BUILDRELAY_PROVIDER_ORDER") {
            self.providers.order = Some(parse_order(&raw));
            attr.insert(
                "providers.order".to_string(),
                ConfigSource::Env("BUILDRELAY_PROVIDER_ORDER".to_string()),
            );
        }

        if let Some(raw) = env("BUILDRELAY_OPENROUTER_BUDGET") {
            let budget = raw.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                key: "BUILDRELAY_OPENROUTER_BUDGET".to_string(),
                value: raw.clone(),
            })?;
            self.providers
                .openrouter
                .get_or_insert_with(ProviderSettings::default)
                .budget = Some(budget);
            attr.insert(
                "providers.openrouter.budget".to_string(),
                ConfigSource::Env("BUILDRELAY_OPENROUTER_BUDGET".to_string()),
            );
        }

        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliArgs, attr: &mut HashMap<String, ConfigSource>) {
        if let Some(workers) = cli.workers {
            self.pipeline.workers = Some(workers);
            attr.insert("pipeline.workers".to_string(), ConfigSource::Cli);
        }
        if let Some(order) = &cli.provider_order {
            self.providers.order = Some(order.clone());
            attr.insert("providers.order".to_string(), ConfigSource::Cli);
        }
        if let Some(dir) = &cli.state_dir {
            self.store.state_dir = Some(dir.clone());
            attr.insert("store.state_dir".to_string(), ConfigSource::Cli);
        }
        if let Some(backend) = &cli.store_backend {
            self.store.backend = Some(backend.clone());
            attr.insert("store.backend".to_string(), ConfigSource::Cli);
        }
    }
}

/// Split a comma-separated provider list, dropping blanks.
#[must_use]
pub fn parse_order(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_state_dir(home: Option<String>) -> PathBuf {
    match home {
        Some(h) if !h.trim().is_empty() => PathBuf::from(h).join("state"),
        _ => PathBuf::from(".buildrelay").join("state"),
    }
}

fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::InvalidFile(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&content)
        .map_err(|e| ConfigError::InvalidFile(format!("{}: {e}", path.display())))
}
