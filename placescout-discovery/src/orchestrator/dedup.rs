//! Identity resolution: grouping raw provider hits into canonical venues.
//!
//! Two hits refer to the same place when either
//!
//! 1. their normalised names are equal and they are within
//!    `name_match_radius_m` of each other (or one of them has no
//!    coordinates), or
//! 2. they sit within `proximity_m` of each other and their names are
//!    similar enough (bigram Dice coefficient at or above `fuzzy_threshold`).
//!
//! Proximity candidates are found through a uniform grid with cells of
//! `proximity_m`, searching the 3x3 block around a hit's cell.
//!
//! Groups are emitted in first-seen order. Callers feed hits in registry
//! order, which keeps the output deterministic.

use std::collections::{BTreeMap, HashMap};

use crate::config::DedupConfig;
use crate::types::{GeoPoint, ProviderId, RawHit, Venue};

use super::name_normalize::{bigram_similarity, normalize_name};
use super::scoring::confidence;

/// Metres per degree of latitude (and of longitude at the equator).
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Trust assumed for a provider missing from the trust table.
pub const DEFAULT_TRUST: f64 = 0.5;

type Cell = (i64, i64);

/// A venue under construction.
#[derive(Debug)]
struct Group {
    normalized: String,
    name: String,
    category: Option<String>,
    location: Option<GeoPoint>,
    accuracy_m: f64,
    cell: Option<Cell>,
    address: Option<String>,
    rating: Option<(f64, f64)>,
    providers: Vec<ProviderId>,
    provenance: BTreeMap<ProviderId, serde_json::Map<String, serde_json::Value>>,
}

/// Merges raw hits from several providers into canonical venues.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    config: DedupConfig,
    trust: HashMap<ProviderId, f64>,
}

impl Deduplicator {
    /// Create a deduplicator with per-provider trust weights.
    pub fn new(config: DedupConfig, trust: HashMap<ProviderId, f64>) -> Self {
        Self { config, trust }
    }

    /// Trust weight of `provider`, falling back to [`DEFAULT_TRUST`].
    pub fn trust(&self, provider: &ProviderId) -> f64 {
        self.trust.get(provider).copied().unwrap_or(DEFAULT_TRUST)
    }

    /// Group `hits` into venues.
    ///
    /// `fallback_category` labels venues for which no provider reported a
    /// category. Hits whose name normalises to nothing are dropped.
    pub fn merge<'a>(
        &self,
        hits: impl IntoIterator<Item = &'a RawHit>,
        fallback_category: &str,
    ) -> Vec<Venue> {
        let mut seen = 0usize;
        let mut groups: Vec<Group> = Vec::new();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut grid: HashMap<Cell, Vec<usize>> = HashMap::new();

        for hit in hits {
            seen += 1;
            let normalized = normalize_name(&hit.name);
            if normalized.is_empty() {
                continue;
            }
            let location = hit.location.filter(GeoPoint::is_valid);

            let matched = self
                .find_exact(&groups, &by_name, &normalized, location)
                .or_else(|| {
                    location.and_then(|point| self.find_nearby(&groups, &grid, &normalized, point))
                });

            match matched {
                Some(index) => {
                    let previous_cell = groups[index].cell;
                    self.absorb(&mut groups[index], hit, location);
                    let group = &mut groups[index];
                    group.cell = group.location.map(|p| self.cell_of(p));
                    if group.cell != previous_cell {
                        if let Some(old) = previous_cell {
                            if let Some(members) = grid.get_mut(&old) {
                                members.retain(|i| *i != index);
                            }
                        }
                        if let Some(new) = group.cell {
                            grid.entry(new).or_default().push(index);
                        }
                    }
                }
                None => {
                    let index = groups.len();
                    let group = self.start_group(normalized.clone(), hit, location);
                    if let Some(cell) = group.cell {
                        grid.entry(cell).or_default().push(index);
                    }
                    by_name.entry(normalized).or_default().push(index);
                    groups.push(group);
                }
            }
        }

        tracing::debug!(
            hits = seen,
            venues = groups.len(),
            "deduplicated provider hits"
        );

        groups
            .into_iter()
            .map(|group| self.finish(group, fallback_category))
            .collect()
    }

    fn find_exact(
        &self,
        groups: &[Group],
        by_name: &HashMap<String, Vec<usize>>,
        normalized: &str,
        location: Option<GeoPoint>,
    ) -> Option<usize> {
        by_name.get(normalized)?.iter().copied().find(|&index| {
            match (groups[index].location, location) {
                (Some(a), Some(b)) => a.distance_m(&b) <= self.config.name_match_radius_m,
                _ => true,
            }
        })
    }

    fn find_nearby(
        &self,
        groups: &[Group],
        grid: &HashMap<Cell, Vec<usize>>,
        normalized: &str,
        point: GeoPoint,
    ) -> Option<usize> {
        let (row, col) = self.cell_of(point);
        let mut candidates: Vec<usize> = (-1..=1)
            .flat_map(|dr| (-1..=1).map(move |dc| (row + dr, col + dc)))
            .filter_map(|cell| grid.get(&cell))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();

        candidates.into_iter().find(|&index| {
            let group = &groups[index];
            group.location.is_some_and(|loc| {
                loc.distance_m(&point) <= self.config.proximity_m
                    && bigram_similarity(&group.normalized, normalized)
                        >= self.config.fuzzy_threshold
            })
        })
    }

    fn cell_of(&self, point: GeoPoint) -> Cell {
        let size = self.config.proximity_m;
        let y = point.lat * METRES_PER_DEGREE;
        let x = point.lon * METRES_PER_DEGREE * point.lat.to_radians().cos();
        ((y / size).floor() as i64, (x / size).floor() as i64)
    }

    fn start_group(&self, normalized: String, hit: &RawHit, location: Option<GeoPoint>) -> Group {
        let mut provenance = BTreeMap::new();
        provenance.insert(hit.provider.clone(), hit.payload.clone());
        Group {
            normalized,
            name: hit.name.trim().to_owned(),
            category: non_empty(hit.category.as_deref()),
            location,
            accuracy_m: accuracy_of(hit, location),
            cell: location.map(|p| self.cell_of(p)),
            address: non_empty(hit.address.as_deref()),
            rating: hit.rating.map(|r| (self.trust(&hit.provider), r)),
            providers: vec![hit.provider.clone()],
            provenance,
        }
    }

    fn absorb(&self, group: &mut Group, hit: &RawHit, location: Option<GeoPoint>) {
        if !group.providers.contains(&hit.provider) {
            group.providers.push(hit.provider.clone());
        }
        group
            .provenance
            .entry(hit.provider.clone())
            .or_insert_with(|| hit.payload.clone());

        if let Some(point) = location {
            let accuracy = accuracy_of(hit, location);
            if group.location.is_none() || accuracy < group.accuracy_m {
                group.location = Some(point);
                group.accuracy_m = accuracy;
            }
        }

        if let Some(address) = non_empty(hit.address.as_deref()) {
            let longer = group
                .address
                .as_ref()
                .map_or(true, |current| address.chars().count() > current.chars().count());
            if longer {
                group.address = Some(address);
            }
        }

        if let Some(rating) = hit.rating {
            let trust = self.trust(&hit.provider);
            if group.rating.map_or(true, |(current, _)| trust > current) {
                group.rating = Some((trust, rating));
            }
        }

        if group.category.is_none() {
            group.category = non_empty(hit.category.as_deref());
        }
    }

    fn finish(&self, group: Group, fallback_category: &str) -> Venue {
        Venue {
            id: venue_id(&group.normalized, group.location),
            confidence: confidence(&group.providers, &self.trust),
            name: group.name,
            category: group
                .category
                .unwrap_or_else(|| fallback_category.trim().to_owned()),
            lat: group.location.map(|p| p.lat),
            lon: group.location.map(|p| p.lon),
            address: group.address,
            rating: group.rating.map(|(_, rating)| rating),
            source_providers: group.providers,
            provenance: group.provenance,
        }
    }
}

/// Stable venue id: BLAKE3 of the normalised name and the ~110 m geo-cell.
pub fn venue_id(normalized_name: &str, location: Option<GeoPoint>) -> String {
    let cell = location.map_or_else(
        || "nogeo".to_owned(),
        |p| format!("{:.3},{:.3}", p.lat, p.lon),
    );
    let digest = blake3::hash(format!("{normalized_name}|{cell}").as_bytes());
    digest.to_hex().as_str()[..16].to_owned()
}

fn accuracy_of(hit: &RawHit, location: Option<GeoPoint>) -> f64 {
    match location {
        Some(_) => hit.coord_accuracy_m.unwrap_or(f64::MAX),
        None => f64::INFINITY,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup() -> Deduplicator {
        let trust = [("overpass", 0.7), ("nominatim", 0.6), ("duckduckgo", 0.25)]
            .into_iter()
            .map(|(id, t)| (ProviderId::new(id), t))
            .collect();
        Deduplicator::new(DedupConfig::default(), trust)
    }

    fn hit(provider: &str, name: &str) -> RawHit {
        RawHit::new(ProviderId::new(provider), name)
    }

    fn hit_at(provider: &str, name: &str, lat: f64, lon: f64, accuracy: f64) -> RawHit {
        hit(provider, name).with_location(GeoPoint::new(lat, lon), accuracy)
    }

    #[test]
    fn unique_hits_pass_through_in_order() {
        let hits = vec![
            hit_at("overpass", "Café A", 38.7100, -9.1400, 5.0),
            hit_at("overpass", "Café B", 38.7200, -9.1500, 5.0),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues.len(), 2);
        assert_eq!(venues[0].name, "Café A");
        assert_eq!(venues[1].name, "Café B");
    }

    #[test]
    fn same_name_nearby_merges_providers() {
        let hits = vec![
            hit_at("overpass", "Fábrica Coffee Roasters", 38.7100, -9.1400, 5.0),
            hit_at("nominatim", "fábrica coffee roasters", 38.7101, -9.1401, 25.0),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues.len(), 1);
        assert_eq!(
            venues[0].source_providers,
            vec![ProviderId::new("overpass"), ProviderId::new("nominatim")]
        );
    }

    #[test]
    fn same_name_far_apart_stays_separate() {
        // Two branches of one chain, about 1.1 km apart.
        let hits = vec![
            hit_at("overpass", "Starbucks", 38.7100, -9.1400, 5.0),
            hit_at("overpass", "Starbucks", 38.7200, -9.1400, 5.0),
        ];
        assert_eq!(dedup().merge(&hits, "coffee").len(), 2);
    }

    #[test]
    fn name_without_coordinates_joins_located_group() {
        let hits = vec![
            hit_at("overpass", "The Mill", 38.7100, -9.1400, 5.0),
            hit("duckduckgo", "Mill"),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].source_providers.len(), 2);
        assert_eq!(venues[0].lat, Some(38.7100));
    }

    #[test]
    fn fuzzy_name_within_proximity_merges() {
        let hits = vec![
            hit_at("overpass", "Copenhagen Coffee Lab", 38.7100, -9.1400, 5.0),
            hit_at("nominatim", "Copenhagen Coffee Lab.", 38.7101, -9.1400, 25.0),
            hit_at("nominatim", "Copenhagen Cofee Lab", 38.7102, -9.1400, 25.0),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].source_providers.len(), 2);
    }

    #[test]
    fn fuzzy_name_beyond_proximity_stays_separate() {
        // ~220 m apart: inside the exact-name radius but outside proximity.
        let hits = vec![
            hit_at("overpass", "Copenhagen Coffee Lab", 38.7100, -9.1400, 5.0),
            hit_at("nominatim", "Copenhagen Cofee Lab", 38.7120, -9.1400, 25.0),
        ];
        assert_eq!(dedup().merge(&hits, "coffee").len(), 2);
    }

    #[test]
    fn dissimilar_names_nearby_stay_separate() {
        let hits = vec![
            hit_at("overpass", "Café A Brasileira", 38.7100, -9.1400, 5.0),
            hit_at("nominatim", "Pastelaria Benard", 38.7100, -9.1401, 25.0),
        ];
        assert_eq!(dedup().merge(&hits, "coffee").len(), 2);
    }

    #[test]
    fn most_precise_coordinates_win() {
        let hits = vec![
            hit_at("nominatim", "Café A", 38.71010, -9.14010, 25.0),
            hit_at("overpass", "Café A", 38.71000, -9.14000, 5.0),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].lat, Some(38.71000));
        assert_eq!(venues[0].lon, Some(-9.14000));
    }

    #[test]
    fn longest_address_and_first_category_kept() {
        let hits = vec![
            hit_at("overpass", "Café A", 38.71, -9.14, 5.0)
                .with_address("Rua Augusta")
                .with_category("cafe"),
            hit_at("nominatim", "Café A", 38.71, -9.14, 25.0)
                .with_address("Rua Augusta 12, 1100-053 Lisboa")
                .with_category("amenity"),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues[0].address.as_deref(), Some("Rua Augusta 12, 1100-053 Lisboa"));
        assert_eq!(venues[0].category, "cafe");
    }

    #[test]
    fn fallback_category_used_when_none_reported() {
        let venues = dedup().merge(&[hit("duckduckgo", "Café A")], " coffee ");
        assert_eq!(venues[0].category, "coffee");
    }

    #[test]
    fn rating_from_most_trusted_provider() {
        let hits = vec![
            hit("duckduckgo", "Café A").with_rating(2.0),
            hit("overpass", "Café A").with_rating(4.5),
            hit("nominatim", "Café A").with_rating(3.0),
        ];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues[0].rating, Some(4.5));
    }

    #[test]
    fn confidence_combines_distinct_provider_trust() {
        let hits = vec![
            hit("overpass", "Café A"),
            hit("overpass", "Café A"),
            hit("nominatim", "Café A"),
        ];
        let venues = dedup().merge(&hits, "coffee");
        let expected = 1.0 - (1.0 - 0.7) * (1.0 - 0.6);
        assert!((venues[0].confidence - expected).abs() < 1e-9);
        assert_eq!(venues[0].source_providers.len(), 2);
    }

    #[test]
    fn provenance_keeps_first_payload_per_provider() {
        let mut first = serde_json::Map::new();
        first.insert("osm_id".into(), serde_json::json!(1));
        let mut second = serde_json::Map::new();
        second.insert("osm_id".into(), serde_json::json!(2));
        let hits = vec![
            hit("overpass", "Café A").with_payload(first),
            hit("overpass", "Café A").with_payload(second),
        ];
        let venues = dedup().merge(&hits, "coffee");
        let kept = &venues[0].provenance[&ProviderId::new("overpass")];
        assert_eq!(kept["osm_id"], serde_json::json!(1));
    }

    #[test]
    fn empty_names_are_dropped() {
        let hits = vec![hit("overpass", "  "), hit("overpass", "---")];
        assert!(dedup().merge(&hits, "coffee").is_empty());
    }

    #[test]
    fn out_of_range_coordinates_ignored() {
        let hits = vec![hit_at("overpass", "Café A", 120.0, 0.0, 5.0)];
        let venues = dedup().merge(&hits, "coffee");
        assert_eq!(venues[0].lat, None);
    }

    #[test]
    fn venue_id_is_stable_and_cell_based() {
        let a = venue_id("cafe a", Some(GeoPoint::new(38.71001, -9.14001)));
        let b = venue_id("cafe a", Some(GeoPoint::new(38.71002, -9.14002)));
        let c = venue_id("cafe a", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn merging_is_deterministic() {
        let hits = vec![
            hit_at("overpass", "Café A", 38.7100, -9.1400, 5.0),
            hit_at("nominatim", "Cafe A", 38.7100, -9.1400, 25.0),
            hit_at("overpass", "Café B", 38.7300, -9.1400, 5.0),
        ];
        let first = dedup().merge(&hits, "coffee");
        let second = dedup().merge(&hits, "coffee");
        assert_eq!(first, second);
    }
}
