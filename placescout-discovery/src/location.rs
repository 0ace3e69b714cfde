//! Place-name geocoding backed by the long-TTL location cache tier.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::CacheStore;
use crate::error::ProviderError;
use crate::types::GeoPoint;

/// Resolves a place name ("Lisbon") to a representative coordinate.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// Geocode `place`. `Ok(None)` means the upstream knows no such place.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the upstream call failed.
    async fn geocode(&self, place: &str, timeout: Duration)
        -> Result<Option<GeoPoint>, ProviderError>;
}

/// Geocode through the location cache, storing fresh results.
///
/// # Errors
///
/// Propagates the resolver's error on a cache miss.
pub async fn resolve_cached(
    resolver: &dyn LocationResolver,
    cache: &CacheStore,
    place: &str,
    timeout: Duration,
) -> Result<Option<GeoPoint>, ProviderError> {
    if let Some(point) = cache.get_location(place).await {
        tracing::trace!(place, "location cache hit");
        return Ok(Some(point));
    }
    let resolved = resolver.geocode(place, timeout).await?;
    if let Some(point) = resolved {
        cache.put_location(place, point).await;
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        answer: Option<GeoPoint>,
    }

    #[async_trait]
    impl LocationResolver for CountingResolver {
        async fn geocode(
            &self,
            _place: &str,
            _timeout: Duration,
        ) -> Result<Option<GeoPoint>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    #[tokio::test]
    async fn second_lookup_served_from_cache() {
        let cache = CacheStore::new(CacheConfig::default());
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            answer: Some(GeoPoint::new(38.72, -9.14)),
        };

        let first = resolve_cached(&resolver, &cache, "Lisbon", Duration::from_secs(1))
            .await
            .expect("resolve");
        let second = resolve_cached(&resolver, &cache, "lisbon", Duration::from_secs(1))
            .await
            .expect("resolve");

        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_place_is_not_cached() {
        let cache = CacheStore::new(CacheConfig::default());
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            answer: None,
        };
        for _ in 0..2 {
            let resolved = resolve_cached(&resolver, &cache, "Atlantis", Duration::from_secs(1))
                .await
                .expect("resolve");
            assert!(resolved.is_none());
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }
}
