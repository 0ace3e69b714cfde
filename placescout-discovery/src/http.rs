//! Shared HTTP client and upstream failure classification.
//!
//! Provides a configured [`reqwest::Client`] with browser-like headers and a
//! rotating User-Agent, plus helpers that turn transport errors and HTTP
//! statuses into [`ProviderError`] variants.

use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{DiscoveryError, ProviderError};

/// Realistic browser User-Agent strings, rotated per client.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Build the [`reqwest::Client`] shared by all HTTP-backed providers.
///
/// No client-wide timeout is set; each request carries the per-call timeout
/// the orchestrator computed for it.
///
/// # Errors
///
/// Returns [`DiscoveryError::Http`] if the client cannot be constructed.
pub fn build_client(user_agent: Option<&str>) -> Result<reqwest::Client, DiscoveryError> {
    let ua = user_agent.unwrap_or_else(|| random_user_agent());

    reqwest::Client::builder()
        .user_agent(ua)
        .connect_timeout(Duration::from_secs(3))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| DiscoveryError::Http(format!("failed to build HTTP client: {e}")))
}

/// Select a random User-Agent string from the rotation list.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS
        .choose(&mut rng)
        .copied()
        // USER_AGENTS is a non-empty const array, choose only returns None on empty slices
        .unwrap_or(USER_AGENTS[0])
}

/// Map a non-success HTTP status to the provider failure it represents.
///
/// Returns `None` for 2xx statuses.
pub fn classify_status(status: StatusCode, provider: &str) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{provider} returned HTTP {}", status.as_u16());
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout(detail),
        _ => ProviderError::Unavailable(detail),
    })
}

/// Map a transport-level [`reqwest::Error`].
///
/// The request URL is stripped from the message since it may carry a
/// credential in its query string.
pub fn classify_transport(err: reqwest::Error, provider: &str) -> ProviderError {
    let err = err.without_url();
    if err.is_timeout() {
        ProviderError::Timeout(format!("{provider} request timed out"))
    } else if err.is_decode() {
        ProviderError::Malformed(format!("{provider} body could not be decoded: {err}"))
    } else {
        ProviderError::Unavailable(format!("{provider} request failed: {err}"))
    }
}

/// Send `request` and return the body as text.
///
/// # Errors
///
/// Transport failures and non-2xx statuses are classified into
/// [`ProviderError`] variants.
pub async fn fetch_text(
    request: RequestBuilder,
    timeout: Duration,
    provider: &str,
) -> Result<String, ProviderError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_transport(e, provider))?;

    if let Some(err) = classify_status(response.status(), provider) {
        return Err(err);
    }

    response
        .text()
        .await
        .map_err(|e| classify_transport(e, provider))
}

/// Send `request` and decode the body as JSON.
///
/// # Errors
///
/// As [`fetch_text`], plus [`ProviderError::Malformed`] when the body is not
/// the expected JSON shape.
pub async fn fetch_json<T: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Duration,
    provider: &str,
) -> Result<T, ProviderError> {
    let body = fetch_text(request, timeout, provider).await?;
    tracing::trace!(provider, bytes = body.len(), "provider response received");
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::Malformed(format!("{provider} returned invalid JSON: {e}")))
}
