//! LLM provider adapters and fallback selection
//!
//! Every provider implements [`ProviderAdapter`]: one attempt in, one typed
//! result out. The [`FallbackSelector`] owns retries, per-call timeouts, and
//! the stage deadline, so adapters stay free of policy.

mod anthropic;
mod budgeted;
mod factory;
mod http_client;
mod openai_compatible;
mod payload;
mod prompt;
mod selector;
mod settings;
mod types;

pub use anthropic::AnthropicAdapter;
pub use budgeted::{BudgetedAdapter, DEFAULT_BUDGET_LIMIT};
pub use factory::{BuiltAdapters, build_adapters};
pub use http_client::{HttpClient, map_status};
pub use openai_compatible::OpenAiCompatibleAdapter;
pub use payload::parse_code_payload;
pub use prompt::build_prompt;
pub use selector::{AggregateFailure, FallbackPolicy, FallbackSelector, Generated, ProviderAttempt};
pub use settings::{AdapterConfig, HttpParams};
pub use types::{
    FailureKind, GeneratedCode, GenerationRequest, ImagePart, Prompt, ProviderAdapter,
    ProviderFailure, ProviderKind, Role,
};
