//! OpenStreetMap Overpass adapter, the geocoded POI index.
//!
//! Categories are mapped to OSM tag filters through configuration
//! (`coffee -> amenity=cafe`). The query is scoped to the neighbourhood box
//! when one is given, otherwise to the administrative area named like the
//! place. `out center` gives ways and relations a representative point.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::http;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::types::{GeoPoint, ProviderId, ProviderKind, RawHit};

use super::{escape_ql, Endpoint};

const DEFAULT_URL: &str = "https://overpass-api.de/api/interpreter";

/// OSM node coordinates are surveyed positions.
const COORD_ACCURACY_M: f64 = 5.0;

/// Tag keys whose value describes what kind of place an element is.
const CATEGORY_KEYS: &[&str] = &["amenity", "shop", "tourism", "leisure", "craft"];

/// Tags carried into provenance when present.
const PROVENANCE_TAGS: &[&str] = &[
    "website",
    "phone",
    "opening_hours",
    "cuisine",
    "wheelchair",
    "brand",
];

/// Overpass API adapter.
pub struct OverpassProvider {
    client: reqwest::Client,
    endpoint: Endpoint,
    category_tags: HashMap<String, Vec<String>>,
}

impl OverpassProvider {
    pub fn new(
        client: reqwest::Client,
        settings: &ProviderSettings,
        category_tags: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            client,
            endpoint: Endpoint::new(ProviderKind::Overpass, settings, DEFAULT_URL),
            category_tags,
        }
    }

    /// Overpass QL for `request`.
    pub(crate) fn build_query(&self, request: &ProviderRequest, timeout: Duration) -> String {
        let filters = self.tag_filters(&request.category);
        let (preamble, scope) = match &request.area.bbox {
            Some(b) => (
                String::new(),
                format!("({},{},{},{})", b.min_lat, b.min_lon, b.max_lat, b.max_lon),
            ),
            None => (
                format!(
                    "area[\"name\"=\"{}\"][\"boundary\"=\"administrative\"]->.searchArea;\n",
                    escape_ql(&request.area.place)
                ),
                "(area.searchArea)".to_owned(),
            ),
        };
        let statements: String = filters
            .iter()
            .map(|filter| format!("  nwr{filter}{scope};\n"))
            .collect();
        format!(
            "[out:json][timeout:{}];\n{preamble}(\n{statements});\nout center {};",
            timeout.as_secs().max(1),
            request.max_results.max(1),
        )
    }

    fn tag_filters(&self, category: &str) -> Vec<String> {
        let key = category.trim().to_lowercase();
        match self.category_tags.get(&key) {
            Some(tags) if !tags.is_empty() => tags.iter().map(|t| tag_filter(t)).collect(),
            // Unmapped categories fall back to a case-insensitive name match.
            _ => vec![format!(
                "[\"name\"~\"{}\",i]",
                escape_ql(&escape_regex(&key))
            )],
        }
    }
}

/// Escape regex metacharacters so user text matches literally.
fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn tag_filter(tag: &str) -> String {
    match tag.split_once('=') {
        Some((key, value)) => format!(
            "[\"{}\"=\"{}\"]",
            escape_ql(key.trim()),
            escape_ql(value.trim())
        ),
        None => format!("[\"{}\"]", escape_ql(tag.trim())),
    }
}

#[async_trait]
impl ProviderAdapter for OverpassProvider {
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
        let timeout = self.endpoint.throttle(timeout).await?;
        let query = self.build_query(request, timeout);
        tracing::trace!(query = %query, "Overpass search");

        let response: OverpassResponse = http::fetch_json(
            self.client.post(&self.endpoint.url).form(&[("data", query)]),
            timeout,
            self.endpoint.id.as_str(),
        )
        .await?;

        let hits = parse_elements(response, &self.endpoint.id, request.max_results);
        tracing::debug!(count = hits.len(), "Overpass results parsed");
        Ok(hits)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<Center>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Center {
    lat: f64,
    lon: f64,
}

/// Turn Overpass elements into hits, skipping unnamed elements.
pub(crate) fn parse_elements(
    response: OverpassResponse,
    provider: &ProviderId,
    max_results: usize,
) -> Vec<RawHit> {
    response
        .elements
        .into_iter()
        .filter_map(|element| element_to_hit(element, provider))
        .take(max_results)
        .collect()
}

fn element_to_hit(element: OverpassElement, provider: &ProviderId) -> Option<RawHit> {
    let name = element.tags.get("name")?.trim().to_owned();
    if name.is_empty() {
        return None;
    }

    let mut payload = serde_json::Map::new();
    payload.insert("osm_type".into(), element.kind.clone().into());
    payload.insert("osm_id".into(), element.id.into());
    for key in PROVENANCE_TAGS {
        if let Some(value) = element.tags.get(*key) {
            payload.insert((*key).to_owned(), value.clone().into());
        }
    }

    let mut hit = RawHit::new(provider.clone(), name).with_payload(payload);

    let point = match (element.lat, element.lon, &element.center) {
        (Some(lat), Some(lon), _) => Some(GeoPoint::new(lat, lon)),
        (_, _, Some(c)) => Some(GeoPoint::new(c.lat, c.lon)),
        _ => None,
    };
    if let Some(point) = point {
        hit = hit.with_location(point, COORD_ACCURACY_M);
    }
    if let Some(category) = CATEGORY_KEYS.iter().find_map(|k| element.tags.get(*k)) {
        hit = hit.with_category(category.clone());
    }
    if let Some(address) = format_address(&element.tags) {
        hit = hit.with_address(address);
    }
    Some(hit)
}

/// "Street 12, 1100-053 City" from `addr:*` tags, or the `addr:full` tag.
fn format_address(tags: &HashMap<String, String>) -> Option<String> {
    if let Some(full) = tags.get("addr:full") {
        return Some(full.clone());
    }
    let street = match (tags.get("addr:street"), tags.get("addr:housenumber")) {
        (Some(street), Some(number)) => Some(format!("{street} {number}")),
        (Some(street), None) => Some(street.clone()),
        _ => None,
    };
    let locality = match (tags.get("addr:postcode"), tags.get("addr:city")) {
        (Some(code), Some(city)) => Some(format!("{code} {city}")),
        (Some(code), None) => Some(code.clone()),
        (None, Some(city)) => Some(city.clone()),
        (None, None) => None,
    };
    let parts: Vec<String> = street.into_iter().chain(locality).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::http::build_client;
    use crate::provider::SearchArea;
    use crate::types::BBox;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE: &str = r#"{
      "version": 0.6,
      "elements": [
        {"type": "node", "id": 101, "lat": 38.7107, "lon": -9.1427,
         "tags": {"amenity": "cafe", "name": "A Brasileira", "addr:street": "Rua Garrett",
                  "addr:housenumber": "120", "addr:city": "Lisboa", "website": "https://abrasileira.pt"}},
        {"type": "way", "id": 202, "center": {"lat": 38.7139, "lon": -9.1334},
         "tags": {"amenity": "cafe", "name": "Fábrica Coffee Roasters"}},
        {"type": "node", "id": 303, "lat": 38.72, "lon": -9.15, "tags": {"amenity": "cafe"}},
        {"type": "node", "id": 404, "lat": 38.73, "lon": -9.16,
         "tags": {"shop": "coffee", "name": "Coffee Shop Without Amenity", "addr:full": "Praça 1"}}
      ]
    }"#;

    fn provider(base_url: Option<String>) -> OverpassProvider {
        let config = DiscoveryConfig::default();
        let settings = ProviderSettings {
            base_url,
            requests_per_minute: 0,
            ..config.providers.overpass.clone()
        };
        let client = build_client(Some("placescout-test")).expect("client");
        OverpassProvider::new(client, &settings, config.category_tags)
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

    fn parse(json: &str, max: usize) -> Vec<RawHit> {
        let response: OverpassResponse = serde_json::from_str(json).expect("fixture");
        parse_elements(response, &ProviderId::new("overpass"), max)
    }

    #[test]
    fn query_uses_area_lookup_without_bbox() {
        let q = provider(None).build_query(&request(None), Duration::from_secs(6));
        assert!(q.starts_with("[out:json][timeout:6];"));
        assert!(q.contains(r#"area["name"="Lisbon"]["boundary"="administrative"]->.searchArea;"#));
        assert!(q.contains(r#"nwr["amenity"="cafe"](area.searchArea);"#));
        assert!(q.ends_with("out center 20;"));
    }

    #[test]
    fn query_uses_bbox_in_south_west_north_east_order() {
        let bbox = BBox::new(-9.15, 38.70, -9.12, 38.72);
        let q = provider(None).build_query(&request(Some(bbox)), Duration::from_secs(6));
        assert!(!q.contains("searchArea"));
        assert!(q.contains(r#"nwr["amenity"="cafe"](38.7,-9.15,38.72,-9.12);"#));
    }

    #[test]
    fn multi_tag_category_emits_union() {
        let mut req = request(None);
        req.category = "Bar".into();
        let q = provider(None).build_query(&req, Duration::from_secs(6));
        assert!(q.contains(r#"nwr["amenity"="bar"]"#));
        assert!(q.contains(r#"nwr["amenity"="pub"]"#));
    }

    #[test]
    fn unmapped_category_falls_back_to_name_match() {
        let mut req = request(None);
        req.category = "Fado \"house\"".into();
        let q = provider(None).build_query(&req, Duration::from_secs(6));
        assert!(q.contains(r#"nwr["name"~"fado \"house\"",i](area.searchArea);"#));
    }

    #[test]
    fn name_match_treats_regex_metacharacters_literally() {
        let mut req = request(None);
        req.category = "c++ (bar).*".into();
        let q = provider(None).build_query(&req, Duration::from_secs(6));
        assert!(q.contains(r#"nwr["name"~"c\\+\\+ \\(bar\\)\\.\\*",i]"#));

        req.category = "(".into();
        let q = provider(None).build_query(&req, Duration::from_secs(6));
        assert!(q.contains(r#"nwr["name"~"\\(",i]"#));
    }

    #[test]
    fn regex_escaping_leaves_plain_text_alone() {
        assert_eq!(escape_regex("fado house"), "fado house");
        assert_eq!(escape_regex("a|b"), r"a\|b");
        assert_eq!(escape_regex(r"x\y"), r"x\\y");
    }

    #[test]
    fn place_name_is_escaped() {
        let mut req = request(None);
        req.area.place = r#"Lis"bon"#.into();
        let q = provider(None).build_query(&req, Duration::from_secs(6));
        assert!(q.contains(r#"area["name"="Lis\"bon"]"#));
    }

    #[test]
    fn parses_nodes_ways_and_skips_unnamed() {
        let hits = parse(FIXTURE, 20);
        assert_eq!(hits.len(), 3);

        assert_eq!(hits[0].name, "A Brasileira");
        assert_eq!(hits[0].location, Some(GeoPoint::new(38.7107, -9.1427)));
        assert_eq!(hits[0].coord_accuracy_m, Some(COORD_ACCURACY_M));
        assert_eq!(hits[0].address.as_deref(), Some("Rua Garrett 120, Lisboa"));
        assert_eq!(hits[0].category.as_deref(), Some("cafe"));
        assert_eq!(hits[0].payload["osm_id"], serde_json::json!(101));
        assert_eq!(hits[0].payload["website"], serde_json::json!("https://abrasileira.pt"));

        assert_eq!(hits[1].location, Some(GeoPoint::new(38.7139, -9.1334)));
        assert_eq!(hits[1].payload["osm_type"], serde_json::json!("way"));

        assert_eq!(hits[2].category.as_deref(), Some("coffee"));
        assert_eq!(hits[2].address.as_deref(), Some("Praça 1"));
    }

    #[test]
    fn parse_respects_max_results() {
        assert_eq!(parse(FIXTURE, 1).len(), 1);
    }

    #[test]
    fn empty_response_parses_to_nothing() {
        assert!(parse(r#"{"elements": []}"#, 20).is_empty());
        assert!(parse("{}", 20).is_empty());
    }

    #[tokio::test]
    async fn search_posts_query_and_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/interpreter"))
            .and(body_string_contains("amenity"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(Some(format!("{}/api/interpreter", server.uri())));
        let hits = provider
            .search(&request(None), Duration::from_secs(5))
            .await
            .expect("search should succeed");
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.provider.as_str() == "overpass"));
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = provider(Some(server.uri()));
        let err = provider
            .search(&request(None), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[tokio::test]
    async fn invalid_json_maps_to_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .mount(&server)
            .await;

        let provider = provider(Some(server.uri()));
        let err = provider
            .search(&request(None), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
