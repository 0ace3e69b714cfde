//! In-memory, TTL-tiered cache of ranked result sets and geocoded places.
//!
//! Result sets are keyed by a sanitised `(place, neighbourhood, category,
//! local_only)` tuple, plus the neighbourhood box edges when a box is given,
//! and stored with a short TTL. Geocoding results live in a
//! second tier with a long TTL. Both are backed by [`moka`].
//!
//! Entries stay physically present for a grace window after they stop being
//! fresh so they can be served as a last resort when every provider fails.
//! Writes to one key go through moka's per-key compute lock and carry a
//! monotonic version: an older version never overwrites a newer entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::types::{BBox, GeoPoint, Query, Venue};

/// Longest sanitised key component, in characters.
const MAX_KEY_COMPONENT_CHARS: usize = 64;

/// Maximum number of geocoded places kept in the location tier.
const MAX_LOCATION_ENTRIES: u64 = 10_000;

/// Composite cache key built only from sanitised components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from its parts.
    ///
    /// Components are lowercased, stripped of everything except letters,
    /// digits and single hyphens, and capped in length, so raw user input
    /// never reaches the key space.
    pub fn new(
        place: &str,
        neighborhood_id: Option<&str>,
        category: &str,
        local_only: bool,
    ) -> Self {
        let scope = if local_only { "local" } else { "all" };
        Self(format!(
            "{}|{}|{}|{scope}",
            sanitize_component(place),
            neighborhood_id.map(sanitize_component).unwrap_or_default(),
            sanitize_component(category),
        ))
    }

    /// Scope the key to a bounding box.
    ///
    /// Result sets are geo-filtered, so two queries that differ only in their
    /// box must never share an entry. Edges are rounded to 5 decimal places
    /// (about a metre).
    pub fn within(mut self, bbox: Option<&BBox>) -> Self {
        if let Some(b) = bbox {
            self.0.push_str(&format!(
                "|{:.5},{:.5},{:.5},{:.5}",
                b.min_lon, b.min_lat, b.max_lon, b.max_lat
            ));
        }
        self
    }

    /// The key a query's results are stored under.
    pub fn for_query(query: &Query) -> Self {
        Self::new(
            &query.place,
            query.neighborhood_id.as_deref(),
            &query.category,
            query.local_only,
        )
        .within(query.neighborhood_bbox.as_ref())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Normalise one key component.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::new();
    let mut pending_sep = false;
    for ch in raw.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out.chars().take(MAX_KEY_COMPONENT_CHARS).collect()
}

/// A cached, ranked result set.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Full ranked list, before truncation to a caller's `max_results`.
    pub venues: Vec<Venue>,
    /// Assembled before every provider finished.
    pub partial: bool,
    pub created_at: Instant,
    /// Entry is fresh until this instant, stale (but present) afterwards.
    pub expires_at: Instant,
    /// A background continuation is still merging late results into this entry.
    pub enrich_in_progress: bool,
    /// Orchestration version that produced the entry.
    pub version: u64,
    ttl: Duration,
}

impl CacheEntry {
    /// Create an entry that is fresh for `ttl` from now.
    pub fn new(key: CacheKey, venues: Vec<Venue>, partial: bool, ttl: Duration, version: u64) -> Self {
        let now = Instant::now();
        Self {
            key,
            venues,
            partial,
            created_at: now,
            expires_at: now + ttl,
            enrich_in_progress: false,
            version,
            ttl,
        }
    }

    /// Mark whether a continuation is still working on this entry.
    pub fn with_enrichment(mut self, in_progress: bool) -> Self {
        self.enrich_in_progress = in_progress;
        self
    }

    /// Returns `true` until `expires_at`.
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }

    /// Copy of this entry carrying new venues, keeping its timestamps.
    pub fn refreshed(&self, venues: Vec<Venue>, partial: bool, enrich_in_progress: bool) -> Self {
        Self {
            venues,
            partial,
            enrich_in_progress,
            ..self.clone()
        }
    }
}

/// Keeps each entry for its TTL plus the stale grace window.
struct EntryExpiry {
    grace: Duration,
}

impl Expiry<CacheKey, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl + self.grace)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl + self.grace)
    }
}

/// The process-wide result and location cache.
pub struct CacheStore {
    config: CacheConfig,
    entries: Cache<CacheKey, CacheEntry>,
    locations: Cache<String, GeoPoint>,
    versions: AtomicU64,
    revision: watch::Sender<u64>,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(EntryExpiry {
                grace: Duration::from_secs(config.stale_grace_secs),
            })
            .build();
        let locations = Cache::builder()
            .max_capacity(MAX_LOCATION_ENTRIES)
            .time_to_live(Duration::from_secs(config.location_ttl_secs))
            .build();
        let (revision, _) = watch::channel(0);
        Self {
            config,
            entries,
            locations,
            versions: AtomicU64::new(0),
            revision,
        }
    }

    /// TTL applied to category result sets.
    pub fn category_ttl(&self) -> Duration {
        Duration::from_secs(self.config.category_ttl_secs)
    }

    /// Hand out the next orchestration version. Strictly increasing.
    pub fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a fresh entry.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).await.filter(CacheEntry::is_fresh)
    }

    /// Look up an entry even if it is past its TTL.
    pub async fn get_stale(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).await
    }

    /// Store `entry` under `key`, fresh for `ttl`, replacing whatever was there.
    pub async fn put(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) {
        let entry = CacheEntry {
            key: key.clone(),
            expires_at: entry.created_at + ttl,
            ttl,
            ..entry
        };
        self.entries.insert(key, entry).await;
        self.bump_revision();
    }

    /// Store `entry` unless the key already holds a newer version.
    ///
    /// Returns `true` if the entry was written.
    pub async fn put_if_newer(&self, entry: CacheEntry) -> bool {
        let version = entry.version;
        let result = self
            .entries
            .entry(entry.key.clone())
            .and_compute_with(|current| {
                let op = match current {
                    Some(existing) if existing.value().version > version => Op::Nop,
                    _ => Op::Put(entry),
                };
                std::future::ready(op)
            })
            .await;
        let written = matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_));
        if written {
            self.bump_revision();
        } else {
            tracing::debug!(version, "discarded cache write older than stored entry");
        }
        written
    }

    /// Set or clear the enrichment flag of an existing entry.
    ///
    /// Returns `false` if the key is absent.
    pub async fn mark_enrich_in_progress(&self, key: &CacheKey, in_progress: bool) -> bool {
        let result = self
            .entries
            .entry(key.clone())
            .and_compute_with(|current| {
                let op = match current {
                    Some(existing) => {
                        let mut entry = existing.into_value();
                        entry.enrich_in_progress = in_progress;
                        Op::Put(entry)
                    }
                    None => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        let updated = matches!(result, CompResult::ReplacedWith(_));
        if updated {
            self.bump_revision();
        }
        updated
    }

    /// Drop an entry.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.entries.invalidate(key).await;
        self.bump_revision();
    }

    /// Receiver that changes whenever any entry is written.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Cached coordinates for a place name.
    pub async fn get_location(&self, place: &str) -> Option<GeoPoint> {
        self.locations.get(&sanitize_component(place)).await
    }

    /// Remember the coordinates of a place name for the location TTL.
    pub async fn put_location(&self, place: &str, point: GeoPoint) {
        self.locations.insert(sanitize_component(place), point).await;
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.entry_count())
            .field("locations", &self.locations.entry_count())
            .field("version", &self.versions.load(Ordering::Relaxed))
            .finish()
    }
}
