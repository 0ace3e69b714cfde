//! Core types: queries, geometry, raw provider hits and canonical venues.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::error::DiscoveryError;

/// Longest place or category string accepted in a query.
const MAX_QUERY_FIELD_LEN: usize = 256;

/// Mean Earth radius used by the haversine distance, in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Identifier of a registered provider (`"overpass"`, `"wikipedia"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a provider id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Built-in provider adapters that the registry knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenStreetMap Overpass API, the geocoded POI index.
    Overpass,
    /// Nominatim free-text geocoder search.
    Nominatim,
    /// DuckDuckGo HTML results, the web-search fallback.
    DuckDuckGo,
    /// Wikipedia geosearch, the encyclopedia fallback.
    Wikipedia,
    /// Operator-supplied catalogue from configuration.
    Curated,
}

impl ProviderKind {
    /// Returns the provider id used for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Overpass => "overpass",
            Self::Nominatim => "nominatim",
            Self::DuckDuckGo => "duckduckgo",
            Self::Wikipedia => "wikipedia",
            Self::Curated => "curated",
        }
    }

    /// Default trust weight in `(0, 1]` used by the confidence formula.
    pub fn default_trust(&self) -> f64 {
        match self {
            Self::Overpass => 0.7,
            Self::Nominatim => 0.6,
            Self::DuckDuckGo => 0.25,
            Self::Wikipedia => 0.45,
            Self::Curated => 0.5,
        }
    }

    /// Default per-call timeout in milliseconds.
    pub fn default_timeout_ms(&self) -> u64 {
        match self {
            Self::Overpass => 6_000,
            Self::Nominatim => 3_000,
            Self::DuckDuckGo => 4_000,
            Self::Wikipedia => 3_000,
            Self::Curated => 500,
        }
    }

    /// Returns the [`ProviderId`] for this kind.
    pub fn id(&self) -> ProviderId {
        ProviderId::new(self.name())
    }

    /// Returns all built-in kinds in registry order.
    pub fn all() -> &'static [ProviderKind] {
        &[
            Self::Overpass,
            Self::Nominatim,
            Self::Wikipedia,
            Self::DuckDuckGo,
            Self::Curated,
        ]
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Returns `true` if both coordinates are finite and in range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other` in metres (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Axis-aligned bounding box in WGS84 degrees.
///
/// Serialised on the wire as `[minLon, minLat, maxLon, maxLat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    /// Create a box from its four edges.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Checks that edges are finite, in range and correctly ordered.
    pub fn validate(&self) -> Result<(), String> {
        let corners = [
            GeoPoint::new(self.min_lat, self.min_lon),
            GeoPoint::new(self.max_lat, self.max_lon),
        ];
        if !corners.iter().all(GeoPoint::is_valid) {
            return Err("bbox coordinates must be finite WGS84 degrees".into());
        }
        if self.min_lon > self.max_lon || self.min_lat > self.max_lat {
            return Err("bbox min edges must not exceed max edges".into());
        }
        Ok(())
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }

    /// Centre of the box.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

impl From<[f64; 4]> for BBox {
    fn from(edges: [f64; 4]) -> Self {
        Self::new(edges[0], edges[1], edges[2], edges[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        [bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat]
    }
}

/// A location query, immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// City or place name the search is scoped to.
    pub place: String,
    /// What kind of venue to look for ("coffee", "museum").
    pub category: String,
    /// Identifier of the neighbourhood the bbox belongs to, if any.
    pub neighborhood_id: Option<String>,
    /// Optional neighbourhood bounding box; results outside it are dropped.
    pub neighborhood_bbox: Option<BBox>,
    /// Caller position, used as the ranking centre.
    pub center: Option<GeoPoint>,
    /// Maximum number of venues to return.
    pub max_results: usize,
    /// Client-facing wall-clock budget in milliseconds.
    pub budget_ms: u64,
    /// Drop chain/franchise venues listed in the configured exclusion list.
    pub local_only: bool,
}

impl Query {
    /// Create a query with default limits (20 results, 2s budget).
    pub fn new(place: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            place: place.into(),
            category: category.into(),
            neighborhood_id: None,
            neighborhood_bbox: None,
            center: None,
            max_results: 20,
            budget_ms: 2_000,
            local_only: false,
        }
    }

    /// Restrict results to a neighbourhood box.
    pub fn with_neighborhood(mut self, id: impl Into<String>, bbox: BBox) -> Self {
        self.neighborhood_id = Some(id.into());
        self.neighborhood_bbox = Some(bbox);
        self
    }

    /// Set the caller position.
    pub fn with_center(mut self, center: GeoPoint) -> Self {
        self.center = Some(center);
        self
    }

    /// Set the maximum number of venues returned.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Set the client-facing budget.
    pub fn with_budget_ms(mut self, budget_ms: u64) -> Self {
        self.budget_ms = budget_ms;
        self
    }

    /// Request chain filtering.
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Rejects queries that must not be dispatched.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let invalid = |msg: &str| Err(DiscoveryError::InvalidQuery(msg.into()));
        if self.place.trim().is_empty() {
            return invalid("place must not be empty");
        }
        if self.category.trim().is_empty() {
            return invalid("category must not be empty");
        }
        if self.place.len() > MAX_QUERY_FIELD_LEN || self.category.len() > MAX_QUERY_FIELD_LEN {
            return invalid("place and category must be at most 256 bytes");
        }
        if self.max_results == 0 {
            return invalid("max_results must be greater than 0");
        }
        if self.budget_ms == 0 {
            return invalid("budget must be greater than 0");
        }
        if let Some(bbox) = &self.neighborhood_bbox {
            bbox.validate().map_err(DiscoveryError::InvalidQuery)?;
        }
        if let Some(center) = &self.center {
            if !center.is_valid() {
                return invalid("user coordinates out of range");
            }
        }
        Ok(())
    }

    /// The budget as a [`Duration`].
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

/// A provider-native record, before identity resolution.
///
/// Adapters extract the candidate fields they understand; everything else
/// stays in `payload` and ends up in the venue's provenance.
#[derive(Debug, Clone)]
pub struct RawHit {
    /// Which provider produced this hit.
    pub provider: ProviderId,
    /// Display name as the provider spells it.
    pub name: String,
    /// Provider's own category label, if any.
    pub category: Option<String>,
    /// Coordinates, if the provider knows them.
    pub location: Option<GeoPoint>,
    /// Postal address or display string.
    pub address: Option<String>,
    /// Rating normalised to 0-5.
    pub rating: Option<f64>,
    /// Estimated coordinate error in metres; smaller is more precise.
    pub coord_accuracy_m: Option<f64>,
    /// Raw provider fields kept for provenance.
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Wall-clock latency of the call that produced this hit.
    pub latency: Duration,
    /// When the hit was fetched.
    pub fetched_at: SystemTime,
}

impl RawHit {
    /// Create a hit with only a name; other fields are filled by builders.
    pub fn new(provider: ProviderId, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            category: None,
            location: None,
            address: None,
            rating: None,
            coord_accuracy_m: None,
            payload: serde_json::Map::new(),
            latency: Duration::ZERO,
            fetched_at: SystemTime::now(),
        }
    }

    pub fn with_location(mut self, location: GeoPoint, accuracy_m: f64) -> Self {
        self.location = Some(location);
        self.coord_accuracy_m = Some(accuracy_m);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// The canonical, deduplicated representation of a real-world place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    /// Stable hash of normalised name and rounded geo-cell.
    pub id: String,
    pub name: String,
    pub category: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub address: Option<String>,
    pub rating: Option<f64>,
    /// Providers that reported this place, in first-seen order. Never empty.
    pub source_providers: Vec<ProviderId>,
    /// Raw fields per contributing provider.
    pub provenance: BTreeMap<ProviderId, serde_json::Map<String, serde_json::Value>>,
    /// Corroboration-weighted confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Venue {
    /// Coordinates of the venue, when both are known.
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}

/// What the engine hands back to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Ranked venues, truncated to the query's `max_results`.
    pub venues: Vec<Venue>,
    /// Assembled before every dispatched provider finished.
    pub partial: bool,
    /// Served from an expired cache entry because every provider failed.
    pub stale: bool,
}
