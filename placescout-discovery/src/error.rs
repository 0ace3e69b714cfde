//! Error types for the placescout-discovery crate.
//!
//! Two layers: [`ProviderError`] describes why a single provider call failed
//! and never leaves the orchestrator, while [`DiscoveryError`] is what callers
//! of the engine can observe. Messages are stable lowercase strings and never
//! contain provider credentials.

/// Failure of a single provider call.
///
/// All variants are recovered locally: the orchestrator records them in the
/// provider's health and leaves that provider's hits out of the merge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The call did not finish within its per-call timeout.
    #[error("provider timed out: {0}")]
    Timeout(String),

    /// The upstream (or the local token bucket) refused the request due to quota.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// The upstream rejected the configured credentials.
    #[error("provider unauthorized: {0}")]
    Unauthorized(String),

    /// The upstream could not be reached or answered with a server error.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The upstream answered but the body could not be understood.
    #[error("provider response malformed: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Short machine-friendly label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Unauthorized(_) => "unauthorized",
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Errors surfaced by the discovery engine.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The query was rejected before any provider was dispatched.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Every provider failed or returned nothing and no cached entry could stand in.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// Invalid engine configuration.
    #[error("config error: {0}")]
    Config(String),

    /// The shared HTTP client could not be constructed.
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Convenience type alias for discovery results.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
