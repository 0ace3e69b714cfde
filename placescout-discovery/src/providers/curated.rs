//! Operator-supplied venue catalogue.
//!
//! Serves venues listed in configuration under the provider id `curated`, so
//! provenance always shows they are not live data. Disabled by default.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::sanitize_component;
use crate::config::{CuratedVenue, ProviderSettings};
use crate::error::ProviderError;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::types::{GeoPoint, ProviderId, ProviderKind, RawHit};

/// Curated coordinates are entered by hand.
const COORD_ACCURACY_M: f64 = 10.0;

/// Catalogue-backed provider.
pub struct CuratedProvider {
    id: ProviderId,
    default_timeout: Duration,
    trust: f64,
    venues: Vec<CuratedVenue>,
}

impl CuratedProvider {
    pub fn new(settings: &ProviderSettings, venues: Vec<CuratedVenue>) -> Self {
        Self {
            id: ProviderKind::Curated.id(),
            default_timeout: settings.timeout(),
            trust: settings.trust,
            venues,
        }
    }

    fn to_hit(&self, venue: &CuratedVenue) -> RawHit {
        let mut payload = serde_json::Map::new();
        payload.insert("source".into(), "curated".into());
        let mut hit = RawHit::new(self.id.clone(), venue.name.clone())
            .with_category(venue.category.clone())
            .with_payload(payload);
        if let (Some(lat), Some(lon)) = (venue.lat, venue.lon) {
            hit = hit.with_location(GeoPoint::new(lat, lon), COORD_ACCURACY_M);
        }
        if let Some(address) = &venue.address {
            hit = hit.with_address(address.clone());
        }
        if let Some(rating) = venue.rating {
            hit = hit.with_rating(rating);
        }
        hit
    }
}

#[async_trait]
impl ProviderAdapter for CuratedProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn trust(&self) -> f64 {
        self.trust
    }

    async fn search(
        &self,
        request: &ProviderRequest,
        _timeout: Duration,
    ) -> Result<Vec<RawHit>, ProviderError> {
        let place = sanitize_component(&request.area.place);
        let category = sanitize_component(&request.category);
        let hits: Vec<RawHit> = self
            .venues
            .iter()
            .filter(|v| {
                sanitize_component(&v.place) == place && sanitize_component(&v.category) == category
            })
            .take(request.max_results)
            .map(|v| self.to_hit(v))
            .collect();
        tracing::debug!(count = hits.len(), "curated venues matched");
        Ok(hits)
    }
}
