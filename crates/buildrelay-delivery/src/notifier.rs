//! Evaluation callback with bounded retry

use std::time::Duration;

use async_trait::async_trait;
use buildrelay_config::NotifyConfig;
use buildrelay_utils::redaction::summarize_body;
use reqwest::Client;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::types::{EvaluationPayload, Notifier, NotifyFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl NotifyPolicy {
    #[must_use]
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            attempts: config.attempts().max(1),
            timeout: config.timeout(),
            base_delay: config.backoff_base(),
            max_delay: config.backoff_max(),
        }
    }

    /// 1s, 2s, 4s, 8s, 8s... with the default settings.
    #[must_use]
    pub fn delay_for(&self, failed: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failed))
            .min(self.max_delay)
    }
}

/// POSTs the payload as JSON. Any 2xx is success.
pub struct HttpNotifier {
    client: Client,
    policy: NotifyPolicy,
}

impl HttpNotifier {
    #[must_use]
    pub fn new(client: Client, policy: NotifyPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, url: &str, payload: &EvaluationPayload) -> Result<(), NotifyFailure> {
        let mut last_status = None;
        let mut message = String::from("not attempted");

        for attempt in 0..self.policy.attempts {
            let sent = self
                .client
                .post(url)
                .timeout(self.policy.timeout)
                .json(payload)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    info!(
                        task_id = %payload.task,
                        round = payload.round.number(),
                        attempt = attempt + 1,
                        "Evaluation callback delivered"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    last_status = Some(status);
                    message = format!("callback returned {status}: {}", summarize_body(&body, 200));
                }
                Err(e) => {
                    last_status = None;
                    message = summarize_body(&e.to_string(), 200);
                }
            }

            warn!(
                task_id = %payload.task,
                round = payload.round.number(),
                attempt = attempt + 1,
                error = %message,
                "Evaluation callback failed"
            );
            if attempt + 1 < self.policy.attempts {
                sleep(self.policy.delay_for(attempt)).await;
            }
        }

        Err(NotifyFailure {
            attempts: self.policy.attempts,
            last_status,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delays_follow_one_to_eight_seconds() {
        let policy = NotifyPolicy::default();
        let delays: Vec<u64> = (0..5).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 8]);
    }

    #[test]
    fn policy_reads_config() {
        let config = NotifyConfig {
            attempts: Some(2),
            ..NotifyConfig::default()
        };
        let policy = NotifyPolicy::from_config(&config);
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.max_delay, Duration::from_secs(8));
    }
}
