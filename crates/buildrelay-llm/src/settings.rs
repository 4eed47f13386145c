use buildrelay_config::ProviderSettings;

use crate::types::ProviderKind;

/// HTTP request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 16_000,
            temperature: 0.2,
        }
    }
}

/// Fully resolved settings for one HTTP adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub params: HttpParams,
}

impl AdapterConfig {
    /// Resolve `settings` over the provider's defaults.
    #[must_use]
    pub fn resolve(kind: ProviderKind, api_key: String, settings: Option<&ProviderSettings>) -> Self {
        let defaults = HttpParams::default();
        Self {
            kind,
            api_key,
            base_url: settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| kind.default_base_url().to_string()),
            model: settings
                .and_then(|s| s.model.clone())
                .unwrap_or_else(|| kind.default_model().to_string()),
            params: HttpParams {
                max_tokens: settings
                    .and_then(|s| s.max_tokens)
                    .unwrap_or(defaults.max_tokens),
                temperature: settings
                    .and_then(|s| s.temperature)
                    .unwrap_or(defaults.temperature),
            },
        }
    }
}
