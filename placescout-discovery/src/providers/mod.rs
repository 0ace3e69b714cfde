//! Provider adapter implementations and the startup registry.
//!
//! Each module provides a struct implementing [`crate::provider::ProviderAdapter`]
//! for one upstream. [`ProviderRegistry::from_config`] builds the enabled ones
//! once at startup; a disabled provider is simply absent.

pub mod curated;
pub mod duckduckgo;
pub mod nominatim;
pub mod overpass;
pub mod wikipedia;

pub use curated::CuratedProvider;
pub use duckduckgo::DuckDuckGoProvider;
pub use nominatim::NominatimProvider;
pub use overpass::OverpassProvider;
pub use wikipedia::WikipediaProvider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::CacheStore;
use crate::config::{DiscoveryConfig, ProviderSettings};
use crate::error::ProviderError;
use crate::location::LocationResolver;
use crate::provider::ProviderAdapter;
use crate::rate_limit::TokenBucket;
use crate::types::{ProviderId, ProviderKind};

/// Settings every HTTP-backed adapter carries.
#[derive(Debug)]
pub(crate) struct Endpoint {
    pub(crate) id: ProviderId,
    pub(crate) url: String,
    pub(crate) default_timeout: Duration,
    pub(crate) trust: f64,
    pub(crate) api_key: Option<String>,
    bucket: Option<TokenBucket>,
}

impl Endpoint {
    pub(crate) fn new(kind: ProviderKind, settings: &ProviderSettings, default_url: &str) -> Self {
        Self {
            id: kind.id(),
            url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_owned()),
            default_timeout: settings.timeout(),
            trust: settings.trust,
            api_key: settings.api_key.clone(),
            bucket: TokenBucket::with_burst(settings.requests_per_minute, settings.burst),
        }
    }

    /// Wait for the outbound quota and return what is left of `timeout`.
    pub(crate) async fn throttle(&self, timeout: Duration) -> Result<Duration, ProviderError> {
        let Some(bucket) = &self.bucket else {
            return Ok(timeout);
        };
        let started = Instant::now();
        bucket.acquire(timeout, self.id.as_str()).await?;
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(ProviderError::Timeout(format!(
                "{} budget spent waiting for quota",
                self.id
            )));
        }
        Ok(remaining)
    }
}

/// The static set of adapters the orchestrator fans out to, in dispatch order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build the built-in adapters that are enabled in `config`.
    ///
    /// Nominatim doubles as the place-name geocoder for Wikipedia when it is
    /// enabled; both share its token bucket.
    pub fn from_config(
        config: &DiscoveryConfig,
        client: reqwest::Client,
        cache: Arc<CacheStore>,
    ) -> Self {
        let settings = &config.providers;
        let nominatim = Arc::new(NominatimProvider::new(client.clone(), &settings.nominatim));
        let resolver: Option<Arc<dyn LocationResolver>> = if settings.nominatim.enabled {
            Some(nominatim.clone() as Arc<dyn LocationResolver>)
        } else {
            None
        };

        let mut providers: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
        for kind in ProviderKind::all() {
            let provider_settings = settings.settings(*kind);
            if !provider_settings.enabled {
                tracing::debug!(provider = %kind, "provider disabled by configuration");
                continue;
            }
            let adapter: Arc<dyn ProviderAdapter> = match kind {
                ProviderKind::Overpass => Arc::new(OverpassProvider::new(
                    client.clone(),
                    provider_settings,
                    config.category_tags.clone(),
                )),
                ProviderKind::Nominatim => nominatim.clone() as Arc<dyn ProviderAdapter>,
                ProviderKind::Wikipedia => Arc::new(WikipediaProvider::new(
                    client.clone(),
                    provider_settings,
                    resolver.clone(),
                    Arc::clone(&cache),
                )),
                ProviderKind::DuckDuckGo => {
                    Arc::new(DuckDuckGoProvider::new(client.clone(), provider_settings))
                }
                ProviderKind::Curated => Arc::new(CuratedProvider::new(
                    provider_settings,
                    settings.curated_venues.clone(),
                )),
            };
            providers.push(adapter);
        }

        let registry = Self { providers };
        tracing::info!(providers = ?registry.ids(), "provider registry built");
        registry
    }

    /// Wrap an explicit list of adapters, kept in the given order.
    pub fn from_adapters(providers: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { providers }
    }

    /// Registered provider ids in dispatch order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderAdapter>> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Trust weight per registered provider.
    pub fn trust_table(&self) -> HashMap<ProviderId, f64> {
        self.providers
            .iter()
            .map(|p| (p.id().clone(), p.trust()))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

/// Escape a value for use inside a double-quoted Overpass QL string.
pub(crate) fn escape_ql(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control())
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::http::build_client;

    fn registry(config: &DiscoveryConfig) -> ProviderRegistry {
        let client = build_client(Some("placescout-test")).expect("client");
        let cache = Arc::new(CacheStore::new(CacheConfig::default()));
        ProviderRegistry::from_config(config, client, cache)
    }

    #[test]
    fn default_registry_has_four_live_providers_in_order() {
        let ids = registry(&DiscoveryConfig::default()).ids();
        let names: Vec<&str> = ids.iter().map(ProviderId::as_str).collect();
        assert_eq!(names, ["overpass", "nominatim", "wikipedia", "duckduckgo"]);
    }

    #[test]
    fn disabled_provider_is_absent() {
        let mut config = DiscoveryConfig::default();
        config.providers.duckduckgo.enabled = false;
        config.providers.curated.enabled = true;
        let ids = registry(&config).ids();
        assert!(!ids.contains(&ProviderId::new("duckduckgo")));
        assert!(ids.contains(&ProviderId::new("curated")));
    }

    #[test]
    fn trust_table_reflects_configuration() {
        let mut config = DiscoveryConfig::default();
        config.providers.overpass.trust = 0.9;
        let trust = registry(&config).trust_table();
        assert!((trust[&ProviderId::new("overpass")] - 0.9).abs() < f64::EPSILON);
        assert!((trust[&ProviderId::new("duckduckgo")] - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_returns_remaining_budget() {
        let settings = ProviderSettings {
            requests_per_minute: 60,
            ..ProviderSettings::default()
        };
        let endpoint = Endpoint::new(ProviderKind::Nominatim, &settings, "http://localhost");
        let left = endpoint
            .throttle(Duration::from_secs(3))
            .await
            .expect("token available");
        assert_eq!(left, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_refuses_when_quota_exhausted() {
        let settings = ProviderSettings {
            requests_per_minute: 1,
            ..ProviderSettings::default()
        };
        let endpoint = Endpoint::new(ProviderKind::Overpass, &settings, "http://localhost");
        endpoint.throttle(Duration::from_secs(1)).await.expect("first call");
        let err = endpoint.throttle(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn nominatim_defaults_allow_one_call_per_second() {
        let settings = ProviderSettings::for_kind(ProviderKind::Nominatim);
        let endpoint = Endpoint::new(ProviderKind::Nominatim, &settings, "http://localhost");
        endpoint.throttle(Duration::from_millis(500)).await.expect("first call");
        let err = endpoint.throttle(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));

        let started = Instant::now();
        endpoint
            .throttle(Duration::from_secs(2))
            .await
            .expect("token after refill");
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn base_url_override_wins() {
        let settings = ProviderSettings {
            base_url: Some("http://mirror.local/api".into()),
            ..ProviderSettings::default()
        };
        let endpoint = Endpoint::new(ProviderKind::Overpass, &settings, "https://overpass-api.de");
        assert_eq!(endpoint.url, "http://mirror.local/api");
    }

    #[test]
    fn ql_escaping() {
        assert_eq!(escape_ql(r#"São "Paulo"\"#), r#"São \"Paulo\"\\"#);
        assert_eq!(escape_ql("a\nb"), "ab");
    }
}
