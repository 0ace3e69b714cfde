//! # placescout-discovery
//!
//! Multi-source point-of-interest discovery for placescout.
//!
//! Given a place, a category and an optional neighbourhood box, the engine
//! asks several independent providers at once, merges what they report into
//! canonical venues and returns a ranked list within a fixed time budget.
//!
//! ## Design
//!
//! - Fans out to Overpass, Nominatim, Wikipedia, DuckDuckGo and an optional
//!   curated catalogue, one task per provider
//! - Returns whatever has arrived when the budget elapses, flagged `partial`,
//!   and keeps merging late results into the cache in the background
//! - Resolves identity by normalised name and geo-proximity; venues reported
//!   by more providers rank higher
//! - Skips failing providers with a per-provider circuit breaker
//! - TTL-tiered in-memory cache with a stale fallback when every provider fails
//!
//! ## Security
//!
//! - Provider credentials come from configuration and never appear in errors
//! - Cache keys are built only from sanitised, length-bounded components
//! - Query text is logged only at trace level

pub mod api;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod http;
pub mod location;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod types;

pub use cache::{CacheEntry, CacheKey, CacheStore};
pub use circuit_breaker::{CircuitState, ProviderHealth, ProviderHealthTracker};
pub use config::DiscoveryConfig;
pub use error::{DiscoveryError, ProviderError, Result};
pub use orchestrator::Discovery;
pub use provider::{ProviderAdapter, ProviderRequest, SearchArea};
pub use types::{BBox, GeoPoint, ProviderId, ProviderKind, Query, RawHit, SearchOutcome, Venue};

/// Run one search with a fresh engine built from `config`.
///
/// Convenience for one-off lookups; long-running hosts should build a
/// [`Discovery`] once so the cache and provider health persist across queries.
///
/// # Errors
///
/// Returns [`DiscoveryError::Config`] for invalid configuration, otherwise the
/// same errors as [`Discovery::search`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> placescout_discovery::Result<()> {
/// use placescout_discovery::{DiscoveryConfig, Query};
///
/// let outcome = placescout_discovery::search(
///     Query::new("Lisbon", "coffee"),
///     DiscoveryConfig::default(),
/// )
/// .await?;
/// println!("{} venues, partial: {}", outcome.venues.len(), outcome.partial);
/// # Ok(())
/// # }
/// ```
pub async fn search(query: Query, config: DiscoveryConfig) -> Result<SearchOutcome> {
    Discovery::new(config)?.search(query).await
}
