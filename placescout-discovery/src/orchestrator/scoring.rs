//! Confidence scoring and result ranking.
//!
//! Confidence follows a noisy-OR over the distinct providers that reported a
//! venue:
//!
//! ```text
//! confidence = 1 - Π (1 - trust_i)
//! ```
//!
//! Ranking orders venues by, in turn:
//! - number of source providers (descending)
//! - confidence (descending)
//! - distance to the query centre (ascending, unknown distances last)
//!
//! The sort is stable, so full ties keep their input order.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{GeoPoint, ProviderId, Venue};

use super::dedup::DEFAULT_TRUST;

/// Corroboration-weighted confidence for a set of providers.
///
/// Duplicate ids count once. The result is clamped to `[0, 1]`.
pub fn confidence(providers: &[ProviderId], trust: &HashMap<ProviderId, f64>) -> f64 {
    let mut seen: Vec<&ProviderId> = Vec::with_capacity(providers.len());
    let mut miss = 1.0;
    for provider in providers {
        if seen.contains(&provider) {
            continue;
        }
        seen.push(provider);
        let weight = trust.get(provider).copied().unwrap_or(DEFAULT_TRUST);
        miss *= 1.0 - weight.clamp(0.0, 1.0);
    }
    (1.0 - miss).clamp(0.0, 1.0)
}

/// Sort `venues` best first.
pub fn rank(venues: &mut [Venue], center: Option<GeoPoint>) {
    venues.sort_by(|a, b| compare(a, b, center));
}

fn compare(a: &Venue, b: &Venue, center: Option<GeoPoint>) -> Ordering {
    b.source_providers
        .len()
        .cmp(&a.source_providers.len())
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| {
            let da = center.and_then(|c| a.location().map(|p| c.distance_m(&p)));
            let db = center.and_then(|c| b.location().map(|p| c.distance_m(&p)));
            match (da, db) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
}
