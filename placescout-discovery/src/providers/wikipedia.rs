//! Wikipedia adapter, the encyclopedia fallback.
//!
//! When a centre is known (the neighbourhood box, or the place geocoded
//! through the location cache) the search is a geosearch: CirrusSearch's
//! `nearcoord:` keyword restricts full-text matches for the category to a
//! radius around the centre. Without coordinates it falls back to a plain
//! text search for `"{category} {place}"`. Page coordinates and short
//! descriptions come back in the same request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cache::CacheStore;
use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::http;
use crate::location::{resolve_cached, LocationResolver};
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::types::{GeoPoint, ProviderId, ProviderKind, RawHit};

use super::Endpoint;

const DEFAULT_URL: &str = "https://en.wikipedia.org/w/api.php";

/// Article coordinates are editor-entered and often rounded.
const COORD_ACCURACY_M: f64 = 100.0;

/// Search radius when only the place centre is known.
const PLACE_RADIUS_M: f64 = 5_000.0;

/// Smallest and largest radius passed to `nearcoord`.
const MIN_RADIUS_M: f64 = 500.0;
const MAX_RADIUS_M: f64 = 10_000.0;

/// Upper bound the search API accepts for `gsrlimit`.
const MAX_LIMIT: usize = 50;

/// Wikipedia search adapter.
pub struct WikipediaProvider {
    client: reqwest::Client,
    endpoint: Endpoint,
    resolver: Option<Arc<dyn LocationResolver>>,
    cache: Arc<CacheStore>,
}

impl WikipediaProvider {
    pub fn new(
        client: reqwest::Client,
        settings: &ProviderSettings,
        resolver: Option<Arc<dyn LocationResolver>>,
        cache: Arc<CacheStore>,
    ) -> Self {
        Self {
            client,
            endpoint: Endpoint::new(ProviderKind::Wikipedia, settings, DEFAULT_URL),
            resolver,
            cache,
        }
    }

    /// Centre and radius to search around, if any can be determined.
    async fn search_circle(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Option<(GeoPoint, f64)> {
        if let Some(bbox) = &request.area.bbox {
            let center = bbox.center();
            let corner = GeoPoint::new(bbox.max_lat, bbox.max_lon);
            let radius = center.distance_m(&corner).clamp(MIN_RADIUS_M, MAX_RADIUS_M);
            return Some((center, radius));
        }
        let resolver = self.resolver.as_deref()?;
        // Leave at least half the budget for the search itself.
        match resolve_cached(resolver, &self.cache, &request.area.place, timeout / 2).await {
            Ok(point) => point.map(|p| (p, PLACE_RADIUS_M)),
            Err(err) => {
                tracing::debug!(error = %err, "place geocoding failed, using text search");
                None
            }
        }
    }

    /// Query parameters for the search request.
    pub(crate) fn search_params(
        &self,
        request: &ProviderRequest,
        circle: Option<(GeoPoint, f64)>,
    ) -> Vec<(&'static str, String)> {
        let search = match circle {
            Some((center, radius)) => format!(
                "{} nearcoord:{:.1}km,{:.5},{:.5}",
                request.category,
                radius / 1000.0,
                center.lat,
                center.lon
            ),
            None => format!("{} {}", request.category, request.area.place),
        };
        vec![
            ("action", "query".to_owned()),
            ("format", "json".to_owned()),
            ("formatversion", "2".to_owned()),
            ("generator", "search".to_owned()),
            ("gsrsearch", search),
            ("gsrlimit", request.max_results.clamp(1, MAX_LIMIT).to_string()),
            ("prop", "coordinates|description".to_owned()),
            ("colimit", "max".to_owned()),
        ]
    }
}

#[async_trait]
impl ProviderAdapter for WikipediaProvider {
    fn id(&self) -> &ProviderId {
        &self.endpoint.id
    }

    fn default_timeout(&self) -> Duration {
        self.endpoint.default_timeout
    }

    fn trust(&self) -> f64 {
        self.endpoint.trust
    }

    async fn search(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<Vec<RawHit>, ProviderError> {
        let started = tokio::time::Instant::now();
        let circle = self.search_circle(request, timeout).await;
        let timeout = self
            .endpoint
            .throttle(timeout.saturating_sub(started.elapsed()))
            .await?;

        let params = self.search_params(request, circle);
        tracing::trace!(params = ?params, "Wikipedia search");

        let response: WikiResponse = http::fetch_json(
            self.client.get(&self.endpoint.url).query(&params),
            timeout,
            self.endpoint.id.as_str(),
        )
        .await?;

        let hits = parse_pages(response, &self.endpoint.id, request.max_results);
        tracing::debug!(count = hits.len(), geo = circle.is_some(), "Wikipedia results parsed");
        Ok(hits)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WikiResponse {
    query: Option<WikiQuery>,
}

#[derive(Debug, Deserialize)]
struct WikiQuery {
    #[serde(default)]
    pages: Vec<WikiPage>,
}

#[derive(Debug, Deserialize)]
struct WikiPage {
    pageid: i64,
    title: String,
    /// Search rank; pages come back in arbitrary order.
    #[serde(default)]
    index: i64,
    #[serde(default)]
    coordinates: Vec<WikiCoordinate>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WikiCoordinate {
    lat: f64,
    lon: f64,
}

pub(crate) fn parse_pages(
    response: WikiResponse,
    provider: &ProviderId,
    max_results: usize,
) -> Vec<RawHit> {
    let Some(query) = response.query else {
        return Vec::new();
    };
    let mut pages = query.pages;
    pages.sort_by_key(|p| p.index);

    pages
        .into_iter()
        .take(max_results)
        .map(|page| {
            let mut payload = serde_json::Map::new();
            payload.insert("pageid".into(), page.pageid.into());
            payload.insert(
                "url".into(),
                format!("https://en.wikipedia.org/?curid={}", page.pageid).into(),
            );
            if let Some(description) = &page.description {
                payload.insert("description".into(), description.clone().into());
            }

            let mut hit = RawHit::new(provider.clone(), page.title).with_payload(payload);
            if let Some(coord) = page.coordinates.first() {
                hit = hit.with_location(GeoPoint::new(coord.lat, coord.lon), COORD_ACCURACY_M);
            }
            hit
        })
        .collect()
}
