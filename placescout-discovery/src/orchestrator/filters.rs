//! Post-merge filters: chain exclusion and neighbourhood bounding box.

use crate::types::{BBox, Venue};

use super::name_normalize::normalize_name;

/// Drops franchise venues for `local_only` queries.
///
/// A venue is a chain location when its normalised name equals a configured
/// brand or starts with the brand followed by a space ("starbucks reserve").
#[derive(Debug, Clone, Default)]
pub struct ChainFilter {
    brands: Vec<String>,
}

impl ChainFilter {
    /// Build a filter from operator-configured brand names.
    pub fn new<S: AsRef<str>>(brands: &[S]) -> Self {
        let mut brands: Vec<String> = brands
            .iter()
            .map(|b| normalize_name(b.as_ref()))
            .filter(|b| !b.is_empty())
            .collect();
        brands.sort();
        brands.dedup();
        Self { brands }
    }

    /// Returns `true` if `name` belongs to a configured brand.
    pub fn is_chain(&self, name: &str) -> bool {
        let normalized = normalize_name(name);
        self.brands.iter().any(|brand| {
            normalized == *brand
                || normalized
                    .strip_prefix(brand.as_str())
                    .is_some_and(|rest| rest.starts_with(' '))
        })
    }

    /// Remove chain venues when `local_only` is set; otherwise a no-op.
    pub fn apply(&self, venues: Vec<Venue>, local_only: bool) -> Vec<Venue> {
        if !local_only || self.brands.is_empty() {
            return venues;
        }
        let before = venues.len();
        let kept: Vec<Venue> = venues.into_iter().filter(|v| !self.is_chain(&v.name)).collect();
        tracing::debug!(removed = before - kept.len(), "chain filter applied");
        kept
    }
}

/// Keep only venues inside `bbox` (inclusive). Venues without coordinates
/// are dropped while a box is active; without a box everything is kept.
pub fn geo_filter(venues: Vec<Venue>, bbox: Option<&BBox>) -> Vec<Venue> {
    let Some(bbox) = bbox else {
        return venues;
    };
    venues
        .into_iter()
        .filter(|v| v.location().is_some_and(|p| bbox.contains(&p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderId;
    use std::collections::BTreeMap;

    fn venue(name: &str, at: Option<(f64, f64)>) -> Venue {
        Venue {
            id: name.to_lowercase(),
            name: name.into(),
            category: "coffee".into(),
            lat: at.map(|(lat, _)| lat),
            lon: at.map(|(_, lon)| lon),
            address: None,
            rating: None,
            source_providers: vec![ProviderId::new("overpass")],
            provenance: BTreeMap::new(),
            confidence: 0.7,
        }
    }

    fn names(venues: &[Venue]) -> Vec<&str> {
        venues.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn chain_matches_exact_and_prefixed_names() {
        let filter = ChainFilter::new(&["Starbucks", "Costa Coffee"]);
        assert!(filter.is_chain("STARBUCKS"));
        assert!(filter.is_chain("Starbucks Reserve Roastery"));
        assert!(filter.is_chain("Costa-Coffee"));
        assert!(!filter.is_chain("Starbucksy Café"));
        assert!(!filter.is_chain("Fábrica Coffee Roasters"));
    }

    #[test]
    fn chain_filter_only_applies_when_local_only() {
        let filter = ChainFilter::new(&["Starbucks"]);
        let venues = vec![venue("Starbucks", None), venue("Fábrica", None)];

        let all = filter.apply(venues.clone(), false);
        assert_eq!(all.len(), 2);

        let local = filter.apply(venues, true);
        assert_eq!(names(&local), ["Fábrica"]);
    }

    #[test]
    fn empty_brand_list_is_no_op() {
        let filter = ChainFilter::new::<&str>(&[]);
        let venues = vec![venue("Starbucks", None)];
        assert_eq!(filter.apply(venues, true).len(), 1);
    }

    #[test]
    fn blank_brands_ignored() {
        let filter = ChainFilter::new(&["  ", "!!"]);
        assert!(!filter.is_chain("anything"));
    }

    #[test]
    fn bbox_excludes_outside_and_includes_inside() {
        let bbox = BBox::new(-1.0, -1.0, 1.0, 1.0);
        let venues = vec![venue("Outside", Some((2.0, 2.0))), venue("Inside", Some((0.0, 0.0)))];
        let kept = geo_filter(venues, Some(&bbox));
        assert_eq!(names(&kept), ["Inside"]);
    }

    #[test]
    fn bbox_edges_are_inclusive() {
        let bbox = BBox::new(-1.0, -1.0, 1.0, 1.0);
        let kept = geo_filter(vec![venue("Corner", Some((1.0, -1.0)))], Some(&bbox));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn bbox_drops_venues_without_coordinates() {
        let bbox = BBox::new(-1.0, -1.0, 1.0, 1.0);
        assert!(geo_filter(vec![venue("Nowhere", None)], Some(&bbox)).is_empty());
    }

    #[test]
    fn no_bbox_keeps_everything() {
        let venues = vec![venue("Nowhere", None), venue("Far", Some((50.0, 50.0)))];
        assert_eq!(geo_filter(venues, None).len(), 2);
    }
}
