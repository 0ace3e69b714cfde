//! Trait definition for pluggable provider adapters.
//!
//! Each external data source (Overpass, Nominatim, Wikipedia, DuckDuckGo,
//! the curated catalogue) implements [`ProviderAdapter`] so the orchestrator
//! can fan out to them without knowing which concrete sources exist.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{BBox, ProviderId, Query, RawHit};

/// Where to search: always a place name, optionally narrowed to a box.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchArea {
    /// City or place name.
    pub place: String,
    /// Neighbourhood box, when the caller supplied one.
    pub bbox: Option<BBox>,
}

/// The provider-facing view of a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    /// Category as the caller typed it, trimmed.
    pub category: String,
    /// Place and optional box.
    pub area: SearchArea,
    /// Soft cap on hits the provider should return.
    pub max_results: usize,
}

impl ProviderRequest {
    /// Derive the provider request for a query.
    pub fn from_query(query: &Query) -> Self {
        Self {
            category: query.category.trim().to_owned(),
            area: SearchArea {
                place: query.place.trim().to_owned(),
                bbox: query.neighborhood_bbox,
            },
            max_results: query.max_results,
        }
    }
}

/// A pluggable point-of-interest source.
///
/// Implementors translate a [`ProviderRequest`] into one upstream call and
/// extract [`RawHit`] values from the response. Each adapter handles its own:
///
/// - request construction and credentials
/// - outbound rate limiting (token bucket)
/// - classification of upstream failures into [`ProviderError`]
///
/// `search` must not run past `timeout`. The orchestrator wraps every call
/// in its own timeout as well, so a misbehaving adapter only costs its slot.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable id used for health tracking, provenance and logging.
    fn id(&self) -> &ProviderId;

    /// How long a call may take when no tighter budget applies.
    fn default_timeout(&self) -> Duration;

    /// Trust weight in `(0, 1]` for the confidence formula.
    fn trust(&self) -> f64;

    /// Perform one search against the upstream.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] describing why no hits could be produced.
    async fn search(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<Vec<RawHit>, ProviderError>;
}
