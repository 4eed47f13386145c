use std::collections::HashSet;

use buildrelay_utils::error::ConfigError;

use crate::model::{Config, KNOWN_BACKENDS, KNOWN_PROVIDERS};

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    errors: &mut Vec<String>,
    key: &str,
    value: Option<T>,
    min: T,
    max: T,
) {
    if let Some(v) = value
        && (v < min || v > max)
    {
        errors.push(format!("{key} = {v} is outside {min}..={max}"));
    }
}

impl Config {
    /// Validate configuration values, collecting every problem before failing.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let p = &self.pipeline;

        check_range(&mut errors, "pipeline.workers", p.workers, 1, 64);
        check_range(&mut errors, "pipeline.queue_capacity", p.queue_capacity, 1, 10_000);
        check_range(
            &mut errors,
            "pipeline.provider_timeout_secs",
            p.provider_timeout_secs,
            1,
            3_600,
        );
        check_range(
            &mut errors,
            "pipeline.stage_deadline_secs",
            p.stage_deadline_secs,
            1,
            86_400,
        );
        check_range(&mut errors, "pipeline.max_attempts", p.max_attempts, 1, 10);
        check_range(&mut errors, "pipeline.publish_attempts", p.publish_attempts, 1, 10);
        check_range(
            &mut errors,
            "pipeline.publish_timeout_secs",
            p.publish_timeout_secs,
            1,
            3_600,
        );
        if p.backoff_base() > p.backoff_max() {
            errors.push("pipeline.backoff_base_ms must not exceed pipeline.backoff_max_ms".into());
        }

        let order = self.providers.order();
        if order.is_empty() {
            errors.push("providers.order must name at least one provider".into());
        }
        let mut seen = HashSet::new();
        for name in &order {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                errors.push(format!(
                    "providers.order: unknown provider '{name}' (expected one of {})",
                    KNOWN_PROVIDERS.join(", ")
                ));
            }
            if !seen.insert(name.as_str()) {
                errors.push(format!("providers.order: '{name}' listed more than once"));
            }
        }
        for name in KNOWN_PROVIDERS {
            let Some(settings) = self.providers.settings(name) else {
                continue;
            };
            if let Some(t) = settings.temperature
                && !(0.0..=2.0).contains(&t)
            {
                errors.push(format!("providers.{name}.temperature = {t} is outside 0.0..=2.0"));
            }
            check_range(
                &mut errors,
                &format!("providers.{name}.max_tokens"),
                settings.max_tokens,
                1,
                200_000,
            );
            if settings.budget == Some(0) {
                errors.push(format!("providers.{name}.budget must be at least 1"));
            }
        }

        check_range(&mut errors, "notify.attempts", self.notify.attempts, 1, 20);
        check_range(&mut errors, "notify.timeout_secs", self.notify.timeout_secs, 1, 600);
        if self.notify.backoff_base() > self.notify.backoff_max() {
            errors.push("notify.backoff_base_ms must not exceed notify.backoff_max_ms".into());
        }

        check_range(
            &mut errors,
            "github.pages_wait_secs",
            self.github.pages_wait_secs,
            0,
            3_600,
        );
        if let Some(owner) = &self.github.owner
            && owner.trim().is_empty()
        {
            errors.push("github.owner must not be blank".into());
        }

        if !KNOWN_BACKENDS.contains(&self.store.backend()) {
            errors.push(format!(
                "store.backend: unknown backend '{}' (expected one of {})",
                self.store.backend(),
                KNOWN_BACKENDS.join(", ")
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }
}
