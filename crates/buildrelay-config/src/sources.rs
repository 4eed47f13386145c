use std::collections::BTreeMap;

use crate::model::{Config, ConfigSource, KNOWN_PROVIDERS};

fn source_label(source: Option<&ConfigSource>) -> String {
    source.map_or_else(|| "defaults".to_string(), ToString::to_string)
}

impl Config {
    /// Effective configuration as `key -> (value, source)`, sorted by key.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut config = BTreeMap::new();
        let mut add = |key: &str, value: Option<String>| {
            if let Some(val) = value {
                let source = source_label(self.source_attribution.get(key));
                config.insert(key.to_string(), (val, source));
            }
        };

        let p = &self.pipeline;
        add("pipeline.workers", Some(p.workers().to_string()));
        add("pipeline.queue_capacity", Some(p.queue_capacity().to_string()));
        add(
            "pipeline.provider_timeout_secs",
            Some(p.provider_timeout().as_secs().to_string()),
        );
        add(
            "pipeline.stage_deadline_secs",
            Some(p.stage_deadline().as_secs().to_string()),
        );
        add("pipeline.max_attempts", Some(p.max_attempts().to_string()));
        add(
            "pipeline.backoff_base_ms",
            Some(p.backoff_base().as_millis().to_string()),
        );
        add(
            "pipeline.backoff_max_ms",
            Some(p.backoff_max().as_millis().to_string()),
        );
        add("pipeline.publish_attempts", Some(p.publish_attempts().to_string()));
        add(
            "pipeline.publish_backoff_ms",
            Some(p.publish_backoff().as_millis().to_string()),
        );

        add("providers.order", Some(self.providers.order().join(", ")));
        for name in KNOWN_PROVIDERS {
            if let Some(settings) = self.providers.settings(name) {
                add(&format!("providers.{name}.model"), settings.model.clone());
                add(
                    &format!("providers.{name}.budget"),
                    settings.budget.map(|b| b.to_string()),
                );
            }
        }

        add("github.owner", self.github.owner.clone());
        add("github.token_env", Some(self.github.token_env().to_string()));
        add("github.api_base_url", Some(self.github.api_base_url().to_string()));
        add(
            "github.pages_wait_secs",
            Some(self.github.pages_wait().as_secs().to_string()),
        );

        add("notify.attempts", Some(self.notify.attempts().to_string()));
        add(
            "notify.timeout_secs",
            Some(self.notify.timeout().as_secs().to_string()),
        );

        add("store.backend", Some(self.store.backend().to_string()));
        add(
            "store.state_dir",
            self.store
                .state_dir
                .as_ref()
                .map(|d| d.display().to_string()),
        );

        config
    }
}
