//! Wire types for the HTTP surface.
//!
//! The host binary deserialises request bodies into these types, converts
//! them into [`Query`] values and serialises engine outcomes back.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::circuit_breaker::{CircuitState, ProviderHealth};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::types::{BBox, GeoPoint, ProviderId, Query, SearchOutcome, Venue};

fn default_max_results() -> usize {
    20
}

/// Neighbourhood restriction supplied by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborhoodParam {
    pub id: String,
    /// `[minLon, minLat, maxLon, maxLat]`.
    pub bbox: BBox,
}

/// Body of `POST /search` and `POST /search/more`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub city: String,
    /// Category to search for.
    pub q: String,
    pub user_lat: Option<f64>,
    pub user_lon: Option<f64>,
    pub neighborhood: Option<NeighborhoodParam>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Client budget in seconds.
    pub timeout: Option<u64>,
    #[serde(default)]
    pub local_only: bool,
}

impl SearchRequest {
    /// Convert into an engine query.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidQuery`] when only one of the user
    /// coordinates is present. Everything else is checked by
    /// [`Query::validate`] inside the engine.
    pub fn into_query(self, config: &DiscoveryConfig) -> Result<Query> {
        let budget_ms = self
            .timeout
            .map_or(config.default_budget_ms, |secs| secs.saturating_mul(1_000));
        let mut query = Query::new(self.city, self.q)
            .with_max_results(self.max_results)
            .with_budget_ms(budget_ms)
            .local_only(self.local_only);

        match (self.user_lat, self.user_lon) {
            (Some(lat), Some(lon)) => query = query.with_center(GeoPoint::new(lat, lon)),
            (None, None) => {}
            _ => {
                return Err(DiscoveryError::InvalidQuery(
                    "user_lat and user_lon must be given together".into(),
                ))
            }
        }
        if let Some(neighborhood) = self.neighborhood {
            query = query.with_neighborhood(neighborhood.id, neighborhood.bbox);
        }
        Ok(query)
    }
}

/// Successful search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub venues: Vec<Venue>,
    pub partial: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

impl From<SearchOutcome> for SearchResponse {
    fn from(outcome: SearchOutcome) -> Self {
        Self {
            venues: outcome.venues,
            partial: outcome.partial,
            stale: outcome.stale,
        }
    }
}

/// Error response; every failure uses the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

impl ErrorBody {
    pub fn search_failed(details: impl Into<String>) -> Self {
        Self {
            error: "search_failed".to_owned(),
            details: details.into(),
        }
    }
}

impl From<&DiscoveryError> for ErrorBody {
    fn from(err: &DiscoveryError) -> Self {
        Self::search_failed(err.to_string())
    }
}

/// One provider's health, as reported by `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub ewma_latency_ms: f64,
    /// Time left before an open circuit allows a trial call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

impl From<&ProviderHealth> for ProviderStatus {
    fn from(health: &ProviderHealth) -> Self {
        let now = Instant::now();
        Self {
            provider: health.provider_id.clone(),
            state: health.state,
            consecutive_failures: health.consecutive_failures,
            ewma_latency_ms: health.ewma_latency_ms,
            retry_in_ms: health
                .disabled_until
                .filter(|_| health.state == CircuitState::Open)
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while at least one provider is not open.
    pub status: &'static str,
    pub providers: Vec<ProviderStatus>,
}

impl HealthResponse {
    pub fn from_snapshot(snapshot: &[ProviderHealth]) -> Self {
        let providers: Vec<ProviderStatus> = snapshot.iter().map(ProviderStatus::from).collect();
        let usable = providers.iter().any(|p| p.state != CircuitState::Open);
        Self {
            status: if usable { "ok" } else { "degraded" },
            providers,
        }
    }
}
