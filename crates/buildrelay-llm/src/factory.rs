//! Adapter construction from configuration

use std::str::FromStr;
use std::sync::Arc;

use buildrelay_config::ProvidersConfig;
use tracing::{info, warn};

use crate::anthropic::AnthropicAdapter;
use crate::budgeted::{BudgetedAdapter, DEFAULT_BUDGET_LIMIT};
use crate::http_client::HttpClient;
use crate::openai_compatible::OpenAiCompatibleAdapter;
use crate::settings::AdapterConfig;
use crate::types::{ProviderAdapter, ProviderKind};

/// Adapters in preference order, plus the providers left out and why.
pub struct BuiltAdapters {
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub skipped: Vec<String>,
}

/// Build one adapter per configured provider, in `providers.order`.
///
/// A provider whose API key variable is unset or blank is skipped with a
/// warning rather than failing startup; the selector simply has fewer
/// choices. OpenRouter always runs under a call budget; other providers only
/// when one is configured.
pub fn build_adapters(
    providers: &ProvidersConfig,
    env: &dyn Fn(&str) -> Option<String>,
    client: &HttpClient,
) -> BuiltAdapters {
    let mut built = BuiltAdapters {
        adapters: Vec::new(),
        skipped: Vec::new(),
    };

    for name in providers.order() {
        let Ok(kind) = ProviderKind::from_str(&name) else {
            warn!(provider = %name, "Unknown provider in order, skipping");
            built.skipped.push(format!("{name}: unknown provider"));
            continue;
        };
        let settings = providers.settings(kind.as_str());
        let key_env = settings
            .and_then(|s| s.api_key_env.clone())
            .unwrap_or_else(|| kind.default_api_key_env().to_string());

        let Some(api_key) = env(&key_env).filter(|k| !k.trim().is_empty()) else {
            warn!(provider = kind.as_str(), env_var = %key_env, "API key not set, provider disabled");
            built.skipped.push(format!("{}: {key_env} is not set", kind.as_str()));
            continue;
        };

        let config = AdapterConfig::resolve(kind, api_key, settings);
        let adapter: Box<dyn ProviderAdapter> = match kind {
            ProviderKind::Anthropic => Box::new(AnthropicAdapter::new(client.clone(), config)),
            ProviderKind::OpenRouter | ProviderKind::OpenAi | ProviderKind::Gemini => {
                Box::new(OpenAiCompatibleAdapter::new(client.clone(), config))
            }
        };

        let budget = settings.and_then(|s| s.budget);
        let adapter: Arc<dyn ProviderAdapter> = match (kind, budget) {
            (_, Some(limit)) => Arc::new(BudgetedAdapter::new(adapter, limit)),
            (ProviderKind::OpenRouter, None) => {
                Arc::new(BudgetedAdapter::new(adapter, DEFAULT_BUDGET_LIMIT))
            }
            _ => Arc::from(adapter),
        };

        info!(provider = kind.as_str(), budget = ?budget, "Provider enabled");
        built.adapters.push(adapter);
    }

    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrelay_config::ProviderSettings;
    use std::collections::HashMap;

    fn providers(order: &[&str]) -> ProvidersConfig {
        ProvidersConfig {
            order: Some(order.iter().map(|s| (*s).to_string()).collect()),
            ..ProvidersConfig::default()
        }
    }

    fn env_with(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn names(built: &BuiltAdapters) -> Vec<&str> {
        built.adapters.iter().map(|a| a.name()).collect()
    }

    #[test]
    fn adapters_follow_configured_order() {
        let env = env_with(&[("ANTHROPIC_API_KEY", "a"), ("OPENAI_API_KEY", "o")]);
        let built = build_adapters(&providers(&["openai", "anthropic"]), &env, &HttpClient::new().unwrap());
        assert_eq!(names(&built), ["openai", "anthropic"]);
        assert!(built.skipped.is_empty());
    }

    #[test]
    fn missing_keys_are_skipped_not_fatal() {
        let env = env_with(&[("GEMINI_API_KEY", "g"), ("OPENROUTER_API_KEY", "  ")]);
        let built = build_adapters(
            &providers(&["openrouter", "gemini"]),
            &env,
            &HttpClient::new().unwrap(),
        );
        assert_eq!(names(&built), ["gemini"]);
        assert_eq!(built.skipped, ["openrouter: OPENROUTER_API_KEY is not set"]);
    }

    #[test]
    fn custom_key_variable_is_honoured() {
        let mut config = providers(&["anthropic"]);
        config.anthropic = Some(ProviderSettings {
            api_key_env: Some("MY_CLAUDE_KEY".into()),
            ..ProviderSettings::default()
        });
        let env = env_with(&[("MY_CLAUDE_KEY", "secret")]);
        let built = build_adapters(&config, &env, &HttpClient::new().unwrap());
        assert_eq!(names(&built), ["anthropic"]);
    }
}
