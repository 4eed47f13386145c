//! Shared HTTP client for the HTTP-based provider adapters
//!
//! One `reqwest::Client` is built per process and shared by every adapter.
//! The client does not retry: attempt counting and backoff belong to the
//! fallback selector, so each `send` is exactly one provider attempt.

use std::sync::Arc;
use std::time::Duration;

use buildrelay_utils::redaction::{redact_error_message, summarize_body};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::types::{FailureKind, ProviderFailure};

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default request timeout when an adapter does not specify one.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest slice of an error body carried into a failure message.
const MAX_ERROR_BODY_CHARS: usize = 400;

/// Body fragments that mark a 400/422 as a content-policy refusal.
const CONTENT_POLICY_MARKERS: &[&str] = &[
    "content_policy",
    "content policy",
    "content_filter",
    "safety",
    "moderation",
    "flagged",
];

/// Shared HTTP client for provider adapters
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    request_timeout: Duration,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an `InvalidRequest` failure if the client cannot be constructed.
    pub fn new() -> Result<Self, ProviderFailure> {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns an `InvalidRequest` failure if the client cannot be constructed.
    pub fn with_request_timeout(request_timeout: Duration) -> Result<Self, ProviderFailure> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                ProviderFailure::new(
                    FailureKind::InvalidRequest,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client: Arc::new(client),
            request_timeout,
        })
    }

    /// Underlying client, for building requests.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send one request and return the body of a 2xx response.
    ///
    /// # Errors
    ///
    /// Maps non-2xx statuses and transport errors onto [`FailureKind`]s.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
        provider_name: &str,
    ) -> Result<String, ProviderFailure> {
        debug!(
            provider = provider_name,
            timeout_secs = self.request_timeout.as_secs(),
            "Executing HTTP request"
        );

        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, provider_name, self.request_timeout))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            map_transport_error(&e, provider_name, self.request_timeout)
        })?;

        if status.is_success() {
            return Ok(body);
        }
        Err(map_status(status, &body, provider_name))
    }
}

fn map_transport_error(e: &reqwest::Error, provider_name: &str, timeout: Duration) -> ProviderFailure {
    if e.is_timeout() {
        return ProviderFailure::timeout(timeout);
    }
    ProviderFailure::new(
        FailureKind::ServerError,
        format!(
            "{provider_name} request failed: {}",
            redact_error_message(&e.to_string())
        ),
    )
}

/// Map an error status and body to a typed failure.
///
/// - 401/403 -> `InvalidCredentials`
/// - 429 -> `RateLimited`
/// - 408 -> `Timeout`
/// - 400/422 mentioning a content policy -> `ContentRejected`
/// - other 4xx -> `InvalidRequest`
/// - 5xx and anything else -> `ServerError`
#[must_use]
pub fn map_status(status: StatusCode, body: &str, provider_name: &str) -> ProviderFailure {
    let detail = summarize_body(body, MAX_ERROR_BODY_CHARS);
    let message = format!("{provider_name} returned {status}: {detail}");
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::InvalidCredentials,
        StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => FailureKind::Timeout,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
            if mentions_content_policy(body) =>
        {
            FailureKind::ContentRejected
        }
        s if s.is_client_error() => FailureKind::InvalidRequest,
        _ => FailureKind::ServerError,
    };
    ProviderFailure::new(kind, message)
}

fn mentions_content_policy(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CONTENT_POLICY_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_invalid_credentials() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            assert_eq!(
                map_status(status, "", "openrouter").kind,
                FailureKind::InvalidCredentials
            );
        }
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        let limited = map_status(StatusCode::TOO_MANY_REQUESTS, "slow down", "anthropic");
        assert_eq!(limited.kind, FailureKind::RateLimited);
        assert!(limited.kind.is_transient());

        let outage = map_status(StatusCode::BAD_GATEWAY, "<html>", "anthropic");
        assert_eq!(outage.kind, FailureKind::ServerError);
        assert!(outage.kind.is_transient());
    }

    #[test]
    fn content_policy_refusals_are_detected() {
        let body = r#"{"error":{"type":"invalid_request_error","code":"content_policy_violation"}}"#;
        assert_eq!(
            map_status(StatusCode::BAD_REQUEST, body, "openai").kind,
            FailureKind::ContentRejected
        );
        assert_eq!(
            map_status(StatusCode::BAD_REQUEST, r#"{"error":"max_tokens too large"}"#, "openai")
                .kind,
            FailureKind::InvalidRequest
        );
    }

    #[test]
    fn error_bodies_are_redacted_in_messages() {
        let body = format!("bad key sk-ant-api03-{}", "x".repeat(30));
        let failure = map_status(StatusCode::UNAUTHORIZED, &body, "anthropic");
        assert!(failure.message.contains("***"));
        assert!(!failure.message.contains("xxxxxxxxxx"));
    }
}
