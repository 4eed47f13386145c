//! Building the orchestrator's collaborators from configuration

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{Collaborators, Config, StoreError, TaskStore};
use buildrelay_delivery::{GitHubPublisher, HttpNotifier, NotifyPolicy};
use buildrelay_llm::{FallbackPolicy, FallbackSelector, HttpClient, build_adapters};
use buildrelay_orchestrator::AttachmentResolver;
use buildrelay_store::open_store;
use buildrelay_utils::error::ConfigError;
use buildrelay_utils::paths::default_state_dir;
use tracing::{debug, warn};

pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub(crate) fn state_dir(config: &Config) -> PathBuf {
    config
        .store
        .state_dir
        .clone()
        .unwrap_or_else(|| default_state_dir().into_std_path_buf())
}

pub(crate) fn open_configured_store(config: &Config) -> Result<Arc<dyn TaskStore>, StoreError> {
    let dir = state_dir(config);
    debug!(backend = config.store.backend(), state_dir = %dir.display(), "Opening task store");
    open_store(config.store.backend(), &dir)
}

/// Adapters, publisher, notifier, and attachment resolver for one process.
///
/// Fails with a configuration error when no provider has a key or the GitHub
/// token is missing; both would only surface later as failed tasks.
pub(crate) fn collaborators(
    config: &Config,
    store: Arc<dyn TaskStore>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Collaborators> {
    let http = HttpClient::with_request_timeout(config.pipeline.provider_timeout())
        .context("failed to build provider HTTP client")?;
    let built = build_adapters(&config.providers, env, &http);
    for reason in &built.skipped {
        warn!(reason = %reason, "Provider unavailable");
    }
    if built.adapters.is_empty() {
        return Err(ConfigError::MissingRequired(format!(
            "an API key for at least one provider ({})",
            built.skipped.join("; ")
        ))
        .into());
    }
    let selector = FallbackSelector::new(
        built.adapters,
        FallbackPolicy::from_config(&config.pipeline),
    );

    let token_env = config.github.token_env();
    let token = env(token_env)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired(format!("GitHub token in {token_env}")))?;
    let publisher = GitHubPublisher::new(&config.github, token)?;

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let notifier = HttpNotifier::new(client.clone(), NotifyPolicy::from_config(&config.notify));

    Ok(Collaborators {
        store,
        selector,
        publisher: Arc::new(publisher),
        notifier: Arc::new(notifier),
        attachments: AttachmentResolver::new(client),
    })
}
