//! Call-budget wrapper for metered providers.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{FailureKind, GeneratedCode, GenerationRequest, ProviderAdapter, ProviderFailure};

/// Default budget for OpenRouter calls per process
pub const DEFAULT_BUDGET_LIMIT: u32 = 20;

/// Wraps any adapter and refuses calls once `limit` have been attempted.
///
/// The budget counts attempted calls, not successful ones, so retries cannot
/// bypass it. An exhausted budget is the permanent `BudgetExhausted` kind:
/// the selector moves straight on to the next provider.
pub struct BudgetedAdapter {
    inner: Box<dyn ProviderAdapter>,
    used: AtomicU32,
    limit: u32,
}

impl BudgetedAdapter {
    #[must_use]
    pub fn new(inner: Box<dyn ProviderAdapter>, limit: u32) -> Self {
        debug!(provider = inner.name(), limit, "Creating budgeted adapter");
        Self {
            inner,
            used: AtomicU32::new(0),
            limit,
        }
    }

    #[must_use]
    pub fn calls_attempted(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for BudgetedAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ProviderFailure> {
        let current = self.used.fetch_add(1, Ordering::SeqCst);
        if current >= self.limit {
            warn!(
                provider = self.inner.name(),
                limit = self.limit,
                attempted = current + 1,
                "Provider call budget exhausted"
            );
            return Err(ProviderFailure::new(
                FailureKind::BudgetExhausted,
                format!(
                    "{} call budget of {} exhausted",
                    self.inner.name(),
                    self.limit
                ),
            ));
        }

        debug!(
            provider = self.inner.name(),
            call_count = current + 1,
            limit = self.limit,
            "Budget check passed"
        );
        self.inner.generate(request).await
    }
}
