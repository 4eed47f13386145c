//! Provider fallback selector
//!
//! Tries adapters in preference order. Each provider gets a bounded number of
//! attempts with exponential backoff, but only for transient failures; a
//! permanent failure moves on to the next provider at once. The whole stage
//! is capped by a wall-clock deadline.

use std::sync::Arc;
use std::time::Duration;

use buildrelay_config::PipelineConfig;
use buildrelay_utils::redaction::redact_error_message;
use buildrelay_utils::types::{FileSet, ProviderAttemptSummary};
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::types::{FailureKind, GenerationRequest, ProviderAdapter, ProviderFailure};

/// Retry, timeout, and deadline settings for one generation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Attempts per provider, counting the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Hard cap on a single adapter call.
    pub call_timeout: Duration,
    /// Hard cap on the whole stage across all providers.
    pub stage_deadline: Duration,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(120),
            stage_deadline: Duration::from_secs(30 * 60),
        }
    }
}

impl FallbackPolicy {
    #[must_use]
    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        Self {
            max_attempts: pipeline.max_attempts().max(1),
            base_delay: pipeline.backoff_base(),
            max_delay: pipeline.backoff_max(),
            call_timeout: pipeline.provider_timeout(),
            stage_deadline: pipeline.stage_deadline(),
        }
    }

    /// Delay after `failed` consecutive failures: `min(base * 2^failed, max)`.
    #[must_use]
    pub fn delay_for(&self, failed: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// How one provider's turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub attempts: u32,
    pub terminal_kind: FailureKind,
    pub message: String,
}

impl From<&ProviderAttempt> for ProviderAttemptSummary {
    fn from(attempt: &ProviderAttempt) -> Self {
        Self {
            provider: attempt.provider.clone(),
            attempts: attempt.attempts,
            terminal_kind: attempt.terminal_kind.to_string(),
            message: attempt.message.clone(),
        }
    }
}

/// Successful stage result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub provider: String,
    pub model: String,
    pub files: FileSet,
    /// Attempts spent on the winning provider.
    pub attempts: u32,
    /// Providers that failed before the winner.
    pub failed_providers: Vec<ProviderAttempt>,
}

/// Every provider failed, or the stage deadline passed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.summary())]
pub struct AggregateFailure {
    pub attempts: Vec<ProviderAttempt>,
    pub deadline_exceeded: bool,
}

impl AggregateFailure {
    #[must_use]
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no providers are configured".to_string();
        }
        let detail = self
            .attempts
            .iter()
            .map(|a| format!("{} x{} ({})", a.provider, a.attempts, a.terminal_kind))
            .collect::<Vec<_>>()
            .join(", ");
        if self.deadline_exceeded {
            format!("generation stage deadline exceeded after: {detail}")
        } else {
            format!("all providers failed: {detail}")
        }
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ProviderAttemptSummary> {
        self.attempts.iter().map(ProviderAttemptSummary::from).collect()
    }
}

enum Turn {
    Won(Generated),
    Lost(ProviderAttempt),
    OutOfTime(ProviderAttempt),
}

/// Ordered set of adapters plus the policy that governs them.
///
/// Holds no mutable state; concurrent `generate` calls are independent.
pub struct FallbackSelector {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    policy: FallbackPolicy,
}

impl FallbackSelector {
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, policy: FallbackPolicy) -> Self {
        Self { adapters, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Provider names in preference order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run the generation stage.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateFailure`] listing every provider tried when none
    /// produced a usable file set.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generated, AggregateFailure> {
        let deadline = Instant::now() + self.policy.stage_deadline;
        let mut failed = Vec::new();

        for adapter in &self.adapters {
            match self.run_provider(adapter.as_ref(), request, deadline).await {
                Turn::Won(mut generated) => {
                    generated.failed_providers = failed;
                    info!(
                        task_id = %request.task_id,
                        round = request.round.number(),
                        provider = %generated.provider,
                        attempts = generated.attempts,
                        files = generated.files.len(),
                        "Generation succeeded"
                    );
                    return Ok(generated);
                }
                Turn::Lost(attempt) => {
                    warn!(
                        task_id = %request.task_id,
                        provider = %attempt.provider,
                        attempts = attempt.attempts,
                        kind = %attempt.terminal_kind,
                        "Provider exhausted, falling back"
                    );
                    failed.push(attempt);
                }
                Turn::OutOfTime(attempt) => {
                    failed.push(attempt);
                    return Err(AggregateFailure {
                        attempts: failed,
                        deadline_exceeded: true,
                    });
                }
            }
        }

        Err(AggregateFailure {
            attempts: failed,
            deadline_exceeded: false,
        })
    }

    async fn run_provider(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &GenerationRequest,
        deadline: Instant,
    ) -> Turn {
        let provider = adapter.name().to_string();
        let mut attempts = 0;
        let mut last = ProviderFailure::new(FailureKind::Timeout, "not attempted");

        for attempt in 0..self.policy.max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Turn::OutOfTime(deadline_attempt(provider, attempts));
            }

            attempts += 1;
            let call_budget = self.policy.call_timeout.min(remaining);
            debug!(
                task_id = %request.task_id,
                provider = %provider,
                attempt = attempts,
                timeout_secs = call_budget.as_secs(),
                "Calling provider"
            );

            let outcome = match timeout(call_budget, adapter.generate(request)).await {
                Ok(result) => result.and_then(validate_files),
                Err(_) if call_budget < self.policy.call_timeout => {
                    return Turn::OutOfTime(deadline_attempt(provider, attempts));
                }
                Err(_) => Err(ProviderFailure::timeout(call_budget)),
            };

            match outcome {
                Ok(code) => {
                    return Turn::Won(Generated {
                        provider,
                        model: code.model,
                        files: code.files,
                        attempts,
                        failed_providers: Vec::new(),
                    });
                }
                Err(failure) => {
                    warn!(
                        task_id = %request.task_id,
                        provider = %provider,
                        attempt = attempts,
                        kind = %failure.kind,
                        error = %redact_error_message(&failure.message),
                        "Provider attempt failed"
                    );
                    let retry = failure.kind.is_transient() && attempt + 1 < self.policy.max_attempts;
                    last = failure;
                    if !retry {
                        break;
                    }

                    let delay = self.policy.delay_for(attempt);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if delay >= remaining {
                        sleep(remaining).await;
                        return Turn::OutOfTime(deadline_attempt(provider, attempts));
                    }
                    sleep(delay).await;
                }
            }
        }

        Turn::Lost(ProviderAttempt {
            provider,
            attempts,
            terminal_kind: last.kind,
            message: redact_error_message(&last.message),
        })
    }
}

fn deadline_attempt(provider: String, attempts: u32) -> ProviderAttempt {
    ProviderAttempt {
        provider,
        attempts,
        terminal_kind: FailureKind::Timeout,
        message: "generation stage deadline exceeded".to_string(),
    }
}

/// A result only counts when it carries at least one file with a real path.
fn validate_files(
    code: crate::types::GeneratedCode,
) -> Result<crate::types::GeneratedCode, ProviderFailure> {
    if code.files.is_empty() {
        return Err(ProviderFailure::malformed("provider returned no files"));
    }
    if code.files.keys().any(|path| path.trim().is_empty()) {
        return Err(ProviderFailure::malformed("provider returned an empty file path"));
    }
    Ok(code)
}
