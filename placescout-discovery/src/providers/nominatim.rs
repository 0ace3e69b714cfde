//! Nominatim adapter: free-text place search and place-name geocoding.
//!
//! Searches `"{category} in {place}"`, bounded by a `viewbox` when the query
//! carries a neighbourhood box. The same client and token bucket serve
//! [`LocationResolver::geocode`], so geocoding counts against the quota.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::http;
use crate::location::LocationResolver;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::types::{GeoPoint, ProviderId, ProviderKind, RawHit};

use super::Endpoint;

const DEFAULT_URL: &str = "https://nominatim.openstreetmap.org";

/// Nominatim returns centroids and address interpolations.
const COORD_ACCURACY_M: f64 = 25.0;

/// Upper bound Nominatim accepts for `limit`.
const MAX_LIMIT: usize = 50;

/// Nominatim search adapter.
pub struct NominatimProvider {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl NominatimProvider {
    pub fn new(client: reqwest::Client, settings: &ProviderSettings) -> Self {
        Self {
            client,
            endpoint: Endpoint::new(ProviderKind::Nominatim, settings, DEFAULT_URL),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.endpoint.url.trim_end_matches('/'))
    }

    /// Query parameters for a category search.
    pub(crate) fn search_params(&self, request: &ProviderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            (
                "q",
                format!("{} in {}", request.category, request.area.place),
            ),
            ("format", "jsonv2".to_owned()),
            ("limit", request.max_results.clamp(1, MAX_LIMIT).to_string()),
        ];
        if let Some(b) = &request.area.bbox {
            params.push((
                "viewbox",
                format!("{},{},{},{}", b.min_lon, b.min_lat, b.max_lon, b.max_lat),
            ));
            params.push(("bounded", "1".to_owned()));
        }
        self.push_key(&mut params);
        params
    }

    fn push_key(&self, params: &mut Vec<(&'static str, String)>) {
        if let Some(key) = &self.endpoint.api_key {
            params.push(("key", key.clone()));
        }
    }

    async fn fetch(
        &self,
        params: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<Vec<NominatimPlace>, ProviderError> {
        let timeout = self.endpoint.throttle(timeout).await?;
        http::fetch_json(
            self.client
                .get(self.search_url())
                .query(params)
                .header("Accept-Language", "en"),
            timeout,
            self.endpoint.id.as_str(),
        )
        .await
    }
}

#[async_trait]
impl ProviderAdapter for NominatimProvider {
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
        tracing::trace!(category = %request.category, place = %request.area.place, "Nominatim search");
        let places = self.fetch(&self.search_params(request), timeout).await?;
        let hits: Vec<RawHit> = places
            .into_iter()
            .filter_map(|place| place_to_hit(place, &self.endpoint.id))
            .take(request.max_results)
            .collect();
        tracing::debug!(count = hits.len(), "Nominatim results parsed");
        Ok(hits)
    }
}

#[async_trait]
impl LocationResolver for NominatimProvider {
    async fn geocode(
        &self,
        place: &str,
        timeout: Duration,
    ) -> Result<Option<GeoPoint>, ProviderError> {
        let mut params = vec![
            ("q", place.trim().to_owned()),
            ("format", "jsonv2".to_owned()),
            ("limit", "1".to_owned()),
        ];
        self.push_key(&mut params);
        let places = self.fetch(&params, timeout).await?;
        Ok(places.first().and_then(NominatimPlace::point))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NominatimPlace {
    place_id: Option<i64>,
    osm_type: Option<String>,
    osm_id: Option<i64>,
    lat: String,
    lon: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    category: Option<String>,
}

impl NominatimPlace {
    fn point(&self) -> Option<GeoPoint> {
        let point = GeoPoint::new(self.lat.parse().ok()?, self.lon.parse().ok()?);
        point.is_valid().then_some(point)
    }
}

fn place_to_hit(place: NominatimPlace, provider: &ProviderId) -> Option<RawHit> {
    let name = place
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| place.display_name.split(',').next().map(str::trim))
        .filter(|n| !n.is_empty())?
        .to_owned();

    let mut payload = serde_json::Map::new();
    if let Some(id) = place.place_id {
        payload.insert("place_id".into(), id.into());
    }
    if let Some(osm_type) = &place.osm_type {
        payload.insert("osm_type".into(), osm_type.clone().into());
    }
    if let Some(osm_id) = place.osm_id {
        payload.insert("osm_id".into(), osm_id.into());
    }
    if let Some(class) = &place.category {
        payload.insert("class".into(), class.clone().into());
    }

    let mut hit = RawHit::new(provider.clone(), name).with_payload(payload);
    if let Some(point) = place.point() {
        hit = hit.with_location(point, COORD_ACCURACY_M);
    }
    if let Some(kind) = place.kind.as_deref().filter(|k| !k.is_empty()) {
        hit = hit.with_category(kind);
    }
    if !place.display_name.trim().is_empty() {
        hit = hit.with_address(place.display_name.trim());
    }
    Some(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::provider::SearchArea;
    use crate::types::BBox;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE: &str = r#"[
      {"place_id": 1, "osm_type": "node", "osm_id": 11, "lat": "38.7107", "lon": "-9.1427",
       "category": "amenity", "type": "cafe", "name": "A Brasileira",
       "display_name": "A Brasileira, 120, Rua Garrett, Chiado, Lisboa, Portugal"},
      {"place_id": 2, "osm_type": "way", "osm_id": 22, "lat": "38.7139", "lon": "-9.1334",
       "category": "amenity", "type": "cafe", "name": "",
       "display_name": "Fábrica Coffee Roasters, Rua das Portas de Santo Antão, Lisboa"},
      {"place_id": 3, "lat": "not-a-number", "lon": "-9.1", "type": "cafe",
       "display_name": "Broken Coordinates Café, Lisboa"}
    ]"#;

    fn provider(base_url: String) -> NominatimProvider {
        let settings = ProviderSettings {
            base_url: Some(base_url),
            requests_per_minute: 0,
            ..ProviderSettings::for_kind(ProviderKind::Nominatim)
        };
        NominatimProvider::new(build_client(Some("placescout-test")).expect("client"), &settings)
    }

    fn request(bbox: Option<BBox>) -> ProviderRequest {
        ProviderRequest {
            category: "coffee".into(),
            area: SearchArea {
                place: "Lisbon".into(),
                bbox,
            },
            max_results: 20,
        }
    }

    #[test]
    fn params_include_viewbox_only_with_bbox() {
        let p = provider("http://localhost".into());
        let plain = p.search_params(&request(None));
        assert!(plain.contains(&("q", "coffee in Lisbon".to_owned())));
        assert!(!plain.iter().any(|(k, _)| *k == "viewbox"));

        let bounded = p.search_params(&request(Some(BBox::new(-9.15, 38.70, -9.12, 38.72))));
        assert!(bounded.contains(&("viewbox", "-9.15,38.7,-9.12,38.72".to_owned())));
        assert!(bounded.contains(&("bounded", "1".to_owned())));
    }

    #[test]
    fn api_key_forwarded_when_configured() {
        let settings = ProviderSettings {
            api_key: Some("secret".into()),
            ..ProviderSettings::for_kind(ProviderKind::Nominatim)
        };
        let p = NominatimProvider::new(build_client(None).expect("client"), &settings);
        assert!(p.search_params(&request(None)).contains(&("key", "secret".to_owned())));
    }

    #[test]
    fn parses_places_with_name_fallbacks() {
        let places: Vec<NominatimPlace> = serde_json::from_str(FIXTURE).expect("fixture");
        let hits: Vec<RawHit> = places
            .into_iter()
            .filter_map(|p| place_to_hit(p, &ProviderId::new("nominatim")))
            .collect();
        assert_eq!(hits.len(), 3);

        assert_eq!(hits[0].name, "A Brasileira");
        assert_eq!(hits[0].location, Some(GeoPoint::new(38.7107, -9.1427)));
        assert_eq!(hits[0].coord_accuracy_m, Some(COORD_ACCURACY_M));
        assert_eq!(hits[0].category.as_deref(), Some("cafe"));
        assert!(hits[0].address.as_deref().is_some_and(|a| a.contains("Rua Garrett")));
        assert_eq!(hits[0].payload["class"], serde_json::json!("amenity"));

        assert_eq!(hits[1].name, "Fábrica Coffee Roasters");
        assert_eq!(hits[2].name, "Broken Coordinates Café");
        assert!(hits[2].location.is_none());
    }

    #[tokio::test]
    async fn search_hits_search_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "coffee in Lisbon"))
            .and(query_param("format", "jsonv2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .expect(1)
            .mount(&server)
            .await;

        let hits = provider(server.uri())
            .search(&request(None), Duration::from_secs(3))
            .await
            .expect("search should succeed");
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn geocode_returns_first_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Lisbon"))
            .and(query_param("limit", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"lat": "38.7077507", "lon": "-9.1365919", "display_name": "Lisboa, Portugal"}]"#),
            )
            .mount(&server)
            .await;

        let point = provider(server.uri())
            .geocode("Lisbon", Duration::from_secs(3))
            .await
            .expect("geocode")
            .expect("known place");
        assert!((point.lat - 38.7077507).abs() < 1e-9);
    }

    #[tokio::test]
    async fn geocode_unknown_place_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let point = provider(server.uri())
            .geocode("Atlantis", Duration::from_secs(3))
            .await
            .expect("geocode");
        assert!(point.is_none());
    }

    #[tokio::test]
    async fn forbidden_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = provider(server.uri())
            .search(&request(None), Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));
    }
}
