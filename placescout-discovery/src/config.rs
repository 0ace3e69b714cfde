//! Engine configuration with sensible defaults.
//!
//! [`DiscoveryConfig`] is plain data deserialised from the host's TOML file.
//! Every section has a `Default` so an empty file yields a working engine.
//! Brand lists, category tag mappings and curated venues live here rather
//! than in code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::DiscoveryError;
use crate::types::ProviderKind;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Client-facing budget used when a query does not specify one.
    pub default_budget_ms: u64,
    /// Budget for "load more" requests.
    pub load_more_budget_ms: u64,
    /// Absolute cap on background continuation work after T0.
    pub max_background_ms: u64,
    /// Keep enriching the cache entry after the client deadline.
    pub background_enrichment: bool,
    /// Upper bound on `max_results` accepted from callers.
    pub max_results_cap: usize,
    /// Result cache settings.
    pub cache: CacheConfig,
    /// Circuit breaker settings.
    pub health: HealthConfig,
    /// Identity resolution thresholds.
    pub dedup: DedupConfig,
    /// Per-provider settings.
    pub providers: ProvidersConfig,
    /// Chain/franchise brand names excluded for `local_only` queries.
    pub chains: Vec<String>,
    /// Category to OpenStreetMap tag filters (`"coffee" -> ["amenity=cafe"]`).
    pub category_tags: HashMap<String, Vec<String>>,
    /// Custom User-Agent. If `None`, rotates through built-in browser strings.
    pub user_agent: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_budget_ms: 2_000,
            load_more_budget_ms: 8_000,
            max_background_ms: 15_000,
            background_enrichment: true,
            max_results_cap: 100,
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            dedup: DedupConfig::default(),
            providers: ProvidersConfig::default(),
            chains: Vec::new(),
            category_tags: default_category_tags(),
            user_agent: None,
        }
    }
}

impl DiscoveryConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let invalid = |msg: &str| Err(DiscoveryError::Config(msg.into()));
        if self.default_budget_ms == 0 || self.load_more_budget_ms == 0 {
            return invalid("budgets must be greater than 0");
        }
        if self.max_background_ms < self.default_budget_ms {
            return invalid("max_background_ms must be >= default_budget_ms");
        }
        if self.max_results_cap == 0 {
            return invalid("max_results_cap must be greater than 0");
        }
        if self.cache.category_ttl_secs == 0 || self.cache.location_ttl_secs == 0 {
            return invalid("cache TTLs must be greater than 0");
        }
        if self.cache.max_entries == 0 {
            return invalid("cache max_entries must be greater than 0");
        }
        if self.health.failure_threshold == 0 {
            return invalid("failure_threshold must be greater than 0");
        }
        if self.health.base_backoff_ms == 0
            || self.health.max_backoff_ms < self.health.base_backoff_ms
        {
            return invalid("backoff must satisfy 0 < base_backoff_ms <= max_backoff_ms");
        }
        if !(self.health.ewma_alpha > 0.0 && self.health.ewma_alpha <= 1.0) {
            return invalid("ewma_alpha must be in (0, 1]");
        }
        if self.dedup.proximity_m <= 0.0 || self.dedup.name_match_radius_m <= 0.0 {
            return invalid("dedup distances must be positive");
        }
        if !(0.0..=1.0).contains(&self.dedup.fuzzy_threshold) {
            return invalid("fuzzy_threshold must be in [0, 1]");
        }
        for kind in ProviderKind::all() {
            let settings = self.providers.settings(*kind);
            if !(settings.trust > 0.0 && settings.trust <= 1.0) {
                return Err(DiscoveryError::Config(format!(
                    "{kind} trust must be in (0, 1]"
                )));
            }
            if settings.timeout_ms == 0 {
                return Err(DiscoveryError::Config(format!(
                    "{kind} timeout_ms must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Budget for ordinary searches.
    pub fn default_budget(&self) -> Duration {
        Duration::from_millis(self.default_budget_ms)
    }

    /// Background continuation cap.
    pub fn max_background(&self) -> Duration {
        Duration::from_millis(self.max_background_ms)
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Freshness of category result sets.
    pub category_ttl_secs: u64,
    /// Freshness of geocoding results.
    pub location_ttl_secs: u64,
    /// How long past expiry an entry stays available as a stale fallback.
    pub stale_grace_secs: u64,
    /// Maximum number of cached result sets.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            category_ttl_secs: 600,
            location_ttl_secs: 86_400,
            stale_grace_secs: 3_600,
            max_entries: 1_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures before a provider is opened.
    pub failure_threshold: u32,
    /// First backoff after opening.
    pub base_backoff_ms: u64,
    /// Backoff ceiling; doubling stops here.
    pub max_backoff_ms: u64,
    /// Smoothing factor for the latency moving average.
    pub ewma_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff_ms: 30_000,
            max_backoff_ms: 600_000,
            ewma_alpha: 0.3,
        }
    }
}

/// Identity resolution thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Grid cell size and maximum distance for proximity matches.
    pub proximity_m: f64,
    /// Exact-name matches further apart than this are kept separate.
    pub name_match_radius_m: f64,
    /// Minimum bigram similarity for proximity matches.
    pub fuzzy_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            proximity_m: 50.0,
            name_match_radius_m: 250.0,
            fuzzy_threshold: 0.8,
        }
    }
}

/// Settings shared by every provider.
///
/// Fields missing from a configured section fall back to the generic
/// [`Default`], not to the per-kind defaults of [`ProviderSettings::for_kind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Whether the provider is registered at startup.
    pub enabled: bool,
    /// Default per-call timeout.
    pub timeout_ms: u64,
    /// Trust weight in `(0, 1]`.
    pub trust: f64,
    /// Override of the public endpoint (tests, self-hosted mirrors).
    pub base_url: Option<String>,
    /// Outbound quota enforced by the token bucket. 0 disables limiting.
    pub requests_per_minute: u32,
    /// Requests allowed back to back before the refill rate applies.
    /// 0 means the whole per-minute quota.
    pub burst: u32,
    /// Opaque credential forwarded to the provider, if it needs one.
    pub api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 3_000,
            trust: 0.5,
            base_url: None,
            requests_per_minute: 30,
            burst: 0,
            api_key: None,
        }
    }
}

impl ProviderSettings {
    /// Defaults for a given built-in provider.
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self {
            enabled: !matches!(kind, ProviderKind::Curated),
            timeout_ms: kind.default_timeout_ms(),
            trust: kind.default_trust(),
            base_url: None,
            // Public Nominatim asks for at most one request per second.
            requests_per_minute: match kind {
                ProviderKind::Nominatim => 60,
                ProviderKind::Curated => 0,
                _ => 30,
            },
            burst: match kind {
                ProviderKind::Nominatim => 1,
                _ => 0,
            },
            api_key: None,
        }
    }

    /// The per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A venue listed by the operator for the curated provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedVenue {
    /// Place (city) the venue belongs to, matched case-insensitively.
    pub place: String,
    /// Category the venue is listed under, matched case-insensitively.
    pub category: String,
    pub name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub address: Option<String>,
    pub rating: Option<f64>,
}

/// Per-provider configuration sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub overpass: ProviderSettings,
    pub nominatim: ProviderSettings,
    pub wikipedia: ProviderSettings,
    pub duckduckgo: ProviderSettings,
    pub curated: ProviderSettings,
    /// Entries served by the curated provider.
    pub curated_venues: Vec<CuratedVenue>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            overpass: ProviderSettings::for_kind(ProviderKind::Overpass),
            nominatim: ProviderSettings::for_kind(ProviderKind::Nominatim),
            wikipedia: ProviderSettings::for_kind(ProviderKind::Wikipedia),
            duckduckgo: ProviderSettings::for_kind(ProviderKind::DuckDuckGo),
            curated: ProviderSettings::for_kind(ProviderKind::Curated),
            curated_venues: Vec::new(),
        }
    }
}

impl ProvidersConfig {
    /// Settings for a built-in provider kind.
    pub fn settings(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::Overpass => &self.overpass,
            ProviderKind::Nominatim => &self.nominatim,
            ProviderKind::Wikipedia => &self.wikipedia,
            ProviderKind::DuckDuckGo => &self.duckduckgo,
            ProviderKind::Curated => &self.curated,
        }
    }
}

fn default_category_tags() -> HashMap<String, Vec<String>> {
    [
        ("coffee", &["amenity=cafe"][..]),
        ("cafe", &["amenity=cafe"]),
        ("restaurant", &["amenity=restaurant"]),
        ("bar", &["amenity=bar", "amenity=pub"]),
        ("museum", &["tourism=museum"]),
        ("bakery", &["shop=bakery"]),
        ("park", &["leisure=park"]),
        ("hotel", &["tourism=hotel"]),
    ]
    .into_iter()
    .map(|(category, tags)| {
        (
            category.to_owned(),
            tags.iter().map(|t| (*t).to_owned()).collect(),
        )
    })
    .collect()
}
