//! The discovery orchestrator: budgeted fan-out, merge, filter, rank, cache.
//!
//! Every eligible provider is dispatched at T0 on its own task. A collecting
//! task gathers outcomes until all calls finish or the query budget elapses,
//! whichever comes first, then answers the caller with whatever has arrived,
//! merged, filtered and ranked. Calls still outstanding are handed to a
//! [`Continuation`] that keeps folding their hits into the same cache entry
//! after the response has gone out, whether or not anyone is still waiting.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::circuit_breaker::{ProviderHealth, ProviderHealthTracker};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, ProviderError, Result};
use crate::http;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::providers::ProviderRegistry;
use crate::types::{GeoPoint, ProviderId, Query, RawHit, SearchOutcome, Venue};

use super::continuation::Continuation;
use super::dedup::Deduplicator;
use super::filters::{geo_filter, ChainFilter};
use super::scoring::rank;

/// State shared by foreground searches and their continuations.
pub(crate) struct Shared {
    pub(crate) config: DiscoveryConfig,
    pub(crate) registry: ProviderRegistry,
    pub(crate) health: ProviderHealthTracker,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) dedup: Deduplicator,
    pub(crate) chains: ChainFilter,
}

/// Result of one guarded provider call.
pub(crate) struct CallOutcome {
    /// Position of the provider in the registry.
    pub(crate) index: usize,
    pub(crate) provider: ProviderId,
    pub(crate) result: std::result::Result<Vec<RawHit>, ProviderError>,
}

/// Hits received so far, keyed by registry position so merges do not depend
/// on arrival order.
pub(crate) type Collected = BTreeMap<usize, Vec<RawHit>>;

/// Multi-provider venue discovery engine.
///
/// Cheap to clone; clones share the registry, health records and cache.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn run() -> placescout_discovery::Result<()> {
/// use placescout_discovery::{Discovery, DiscoveryConfig, Query};
///
/// let discovery = Discovery::new(DiscoveryConfig::default())?;
/// let outcome = discovery.search(Query::new("Lisbon", "coffee")).await?;
/// for venue in &outcome.venues {
///     println!("{} ({:?})", venue.name, venue.source_providers);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Discovery {
    pub(crate) shared: Arc<Shared>,
}

impl Discovery {
    /// Build an engine with the built-in providers enabled in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] for invalid configuration and
    /// [`DiscoveryError::Http`] if the HTTP client cannot be built.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(CacheStore::new(config.cache.clone()));
        let client = http::build_client(config.user_agent.as_deref())?;
        let registry = ProviderRegistry::from_config(&config, client, Arc::clone(&cache));
        Ok(Self::from_parts(config, registry, cache))
    }

    /// Build an engine over an explicit list of adapters, dispatched in the
    /// given order.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] for invalid configuration.
    pub fn with_providers(
        config: DiscoveryConfig,
        providers: Vec<Arc<dyn ProviderAdapter>>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(CacheStore::new(config.cache.clone()));
        Ok(Self::from_parts(
            config,
            ProviderRegistry::from_adapters(providers),
            cache,
        ))
    }

    fn from_parts(config: DiscoveryConfig, registry: ProviderRegistry, cache: Arc<CacheStore>) -> Self {
        let health = ProviderHealthTracker::new(config.health.clone(), registry.ids());
        let dedup = Deduplicator::new(config.dedup.clone(), registry.trust_table());
        let chains = ChainFilter::new(config.chains.as_slice());
        Self {
            shared: Arc::new(Shared {
                config,
                registry,
                health,
                cache,
                dedup,
                chains,
            }),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.shared.config
    }

    /// The result and location cache.
    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    /// Health records of every registered provider.
    pub fn health_snapshot(&self) -> Vec<ProviderHealth> {
        self.shared.health.snapshot()
    }

    /// Registered provider ids in dispatch order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.shared.registry.ids()
    }

    /// Run a search within the query's budget.
    ///
    /// A fresh cache entry is returned without dispatching when it is
    /// complete or a continuation is still enriching it.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidQuery`] before any dispatch, or
    /// [`DiscoveryError::SearchFailed`] when nothing was found and no cached
    /// entry can stand in.
    pub async fn search(&self, query: Query) -> Result<SearchOutcome> {
        let query = self.prepare(query)?;
        let key = CacheKey::for_query(&query);
        if let Some(entry) = self.shared.cache.get(&key).await {
            if !entry.partial || entry.enrich_in_progress {
                tracing::debug!(key = key.as_str(), partial = entry.partial, "cache hit");
                let center = resolve_center(&self.shared, &query).await;
                return Ok(cached_outcome(&entry, center, query.max_results, false));
            }
        }
        orchestrate(&self.shared, query, key).await
    }

    /// Fetch a more complete result set for a query already searched.
    ///
    /// Waits, up to the load-more budget, for an in-flight continuation to
    /// complete the cached entry. Runs a fresh orchestration with that budget
    /// when there is nothing to wait for.
    ///
    /// # Errors
    ///
    /// Same as [`Discovery::search`].
    pub async fn load_more(&self, query: Query) -> Result<SearchOutcome> {
        let query = self
            .prepare(query)?
            .with_budget_ms(self.shared.config.load_more_budget_ms);
        let key = CacheKey::for_query(&query);
        let deadline = Instant::now() + query.budget();
        // Subscribe before the first read so no write between the two is missed.
        let mut revisions = self.shared.cache.subscribe();
        let center = resolve_center(&self.shared, &query).await;

        loop {
            match self.shared.cache.get(&key).await {
                Some(entry) if !entry.partial => {
                    return Ok(cached_outcome(&entry, center, query.max_results, false));
                }
                Some(entry) if entry.enrich_in_progress => {
                    match timeout_at(deadline, revisions.changed()).await {
                        Ok(Ok(())) => continue,
                        _ => {
                            tracing::debug!(key = key.as_str(), "load more returned before enrichment finished");
                            return Ok(cached_outcome(&entry, center, query.max_results, false));
                        }
                    }
                }
                _ => return orchestrate(&self.shared, query, key).await,
            }
        }
    }

    fn prepare(&self, mut query: Query) -> Result<Query> {
        query.validate()?;
        query.max_results = query.max_results.min(self.shared.config.max_results_cap);
        tracing::trace!(place = %query.place, category = %query.category, "query accepted");
        Ok(query)
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("providers", &self.shared.registry)
            .field("cache", &self.shared.cache)
            .finish()
    }
}

/// One budgeted fan-out for `query`.
///
/// Collection runs on its own task, which owns the fan-out's receiver from
/// dispatch onwards. A caller that goes away only drops the reply: the calls
/// still finish, update health and reach the cache.
async fn orchestrate(shared: &Arc<Shared>, query: Query, key: CacheKey) -> Result<SearchOutcome> {
    let started = Instant::now();
    let version = shared.cache.next_version();
    let (rx, dispatched) = dispatch(shared, &query);
    let (reply_tx, reply_rx) = oneshot::channel();
    let wave = Wave {
        shared: Arc::clone(shared),
        query,
        key,
        version,
        started,
    };
    tokio::spawn(wave.run(rx, dispatched, reply_tx));
    reply_rx.await.unwrap_or_else(|_| {
        Err(DiscoveryError::SearchFailed(
            "search task ended before answering".to_owned(),
        ))
    })
}

/// The collecting side of one orchestration.
struct Wave {
    shared: Arc<Shared>,
    query: Query,
    key: CacheKey,
    version: u64,
    started: Instant,
}

impl Wave {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<CallOutcome>,
        dispatched: usize,
        reply: oneshot::Sender<Result<SearchOutcome>>,
    ) {
        let Self {
            shared,
            query,
            key,
            version,
            started,
        } = self;
        let center = resolve_center(&shared, &query).await;

        let budget = tokio::time::sleep_until(started + query.budget());
        tokio::pin!(budget);
        let mut collected = Collected::new();
        let mut failures = Vec::new();
        let mut pending = dispatched;
        while pending > 0 {
            // The budget wins a tie with a call that ends on the same tick.
            tokio::select! {
                biased;
                () = &mut budget => break,
                received = rx.recv() => match received {
                    Some(outcome) => {
                        pending -= 1;
                        absorb(outcome, &mut collected, &mut failures);
                    }
                    None => pending = 0,
                },
            }
        }

        let partial = pending > 0;
        let enriching = partial && shared.config.background_enrichment;
        let venues = assemble(&shared, &query, &collected, center);
        tracing::debug!(
            dispatched,
            pending,
            venues = venues.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "foreground collection finished"
        );

        let response = if venues.is_empty() {
            fallback(&shared, &key, failures, pending, center, query.max_results).await
        } else {
            store(&shared, key.clone(), version, venues.clone(), partial, enriching).await;
            Ok(outcome(venues, partial, false, query.max_results))
        };
        if reply.send(response).is_err() {
            tracing::debug!(key = key.as_str(), "caller left before the response was ready");
        }

        if enriching {
            let hard_deadline = started + shared.config.max_background().max(query.budget());
            Continuation {
                shared,
                query,
                key,
                version,
                collected,
                pending,
                hard_deadline,
                center,
            }
            .run(rx)
            .await;
        }
    }
}

/// Spawn one guarded call per eligible provider.
fn dispatch(shared: &Arc<Shared>, query: &Query) -> (mpsc::UnboundedReceiver<CallOutcome>, usize) {
    let request = Arc::new(ProviderRequest::from_query(query));
    let (tx, rx) = mpsc::unbounded_channel();
    let mut dispatched = 0;
    for (index, adapter) in shared.registry.iter().enumerate() {
        if !shared.health.is_eligible(adapter.id()) {
            tracing::debug!(provider = %adapter.id(), "provider skipped by circuit breaker");
            continue;
        }
        let timeout = call_timeout(&shared.config, adapter.default_timeout(), query.budget());
        let tx = tx.clone();
        let shared = Arc::clone(shared);
        let adapter = Arc::clone(adapter);
        let request = Arc::clone(&request);
        tokio::spawn(async move {
            let outcome = guarded_call(&shared.health, index, adapter, &request, timeout).await;
            // The receiver is gone once the continuation has given up.
            let _ = tx.send(outcome);
        });
        dispatched += 1;
    }
    (rx, dispatched)
}

/// Per-call timeout for an adapter.
///
/// With background enrichment the call may outlive the client budget, bounded
/// by the background cap; without it the budget is the limit.
pub(crate) fn call_timeout(config: &DiscoveryConfig, default: Duration, budget: Duration) -> Duration {
    if config.background_enrichment {
        default.min(config.max_background())
    } else {
        default.min(budget)
    }
}

/// Run one adapter call behind a timeout, converting panics into
/// [`ProviderError::Unavailable`] and recording the result in `health`.
pub(crate) async fn guarded_call(
    health: &ProviderHealthTracker,
    index: usize,
    adapter: Arc<dyn ProviderAdapter>,
    request: &ProviderRequest,
    timeout: Duration,
) -> CallOutcome {
    let id = adapter.id().clone();
    let started = Instant::now();
    let call = AssertUnwindSafe(adapter.search(request, timeout)).catch_unwind();
    let mut result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ProviderError::Unavailable(format!("{id} adapter panicked"))),
        Err(_) => Err(ProviderError::Timeout(format!(
            "{id} exceeded {}ms",
            timeout.as_millis()
        ))),
    };
    let latency = started.elapsed();

    match &mut result {
        Ok(hits) => {
            health.record_success(&id, latency);
            for hit in hits.iter_mut() {
                hit.provider = id.clone();
                hit.latency = latency;
            }
            tracing::debug!(
                provider = %id,
                count = hits.len(),
                latency_ms = latency.as_millis() as u64,
                "provider returned hits"
            );
        }
        Err(err) => {
            health.record_failure(&id, latency, err);
            tracing::warn!(provider = %id, kind = err.kind(), error = %err, "provider call failed");
        }
    }

    CallOutcome {
        index,
        provider: id,
        result,
    }
}

/// Fold one outcome into the collected hits or the failure list.
///
/// Returns `true` if new hits were added.
pub(crate) fn absorb(outcome: CallOutcome, collected: &mut Collected, failures: &mut Vec<String>) -> bool {
    match outcome.result {
        Ok(hits) if hits.is_empty() => false,
        Ok(hits) => {
            collected.insert(outcome.index, hits);
            true
        }
        Err(err) => {
            failures.push(format!("{}: {err}", outcome.provider));
            false
        }
    }
}

/// Merge, filter and rank everything collected so far.
pub(crate) fn assemble(
    shared: &Shared,
    query: &Query,
    collected: &Collected,
    center: Option<GeoPoint>,
) -> Vec<Venue> {
    let venues = shared.dedup.merge(collected.values().flatten(), &query.category);
    let venues = shared.chains.apply(venues, query.local_only);
    let mut venues = geo_filter(venues, query.neighborhood_bbox.as_ref());
    rank(&mut venues, center);
    venues
}

/// Write a result set under `key`, keeping the entry's timestamps when the
/// same orchestration already wrote it.
///
/// Returns `false` if a newer orchestration owns the key.
pub(crate) async fn store(
    shared: &Shared,
    key: CacheKey,
    version: u64,
    venues: Vec<Venue>,
    partial: bool,
    enriching: bool,
) -> bool {
    let cache = &shared.cache;
    let entry = match cache.get_stale(&key).await {
        Some(existing) if existing.version == version => existing.refreshed(venues, partial, enriching),
        _ => CacheEntry::new(key, venues, partial, cache.category_ttl(), version).with_enrichment(enriching),
    };
    cache.put_if_newer(entry).await
}

/// Ranking centre: caller position, bbox centre, then the geocoded place.
pub(crate) async fn resolve_center(shared: &Shared, query: &Query) -> Option<GeoPoint> {
    if let Some(center) = query.center {
        return Some(center);
    }
    if let Some(bbox) = &query.neighborhood_bbox {
        return Some(bbox.center());
    }
    shared.cache.get_location(&query.place).await
}

/// Serve a cached entry after an empty merge, or fail.
async fn fallback(
    shared: &Shared,
    key: &CacheKey,
    failures: Vec<String>,
    pending: usize,
    center: Option<GeoPoint>,
    max_results: usize,
) -> Result<SearchOutcome> {
    if let Some(entry) = shared
        .cache
        .get_stale(key)
        .await
        .filter(|e| !e.venues.is_empty())
    {
        let stale = !entry.is_fresh();
        tracing::warn!(key = key.as_str(), stale, "no provider returned venues, serving cached entry");
        return Ok(cached_outcome(&entry, center, max_results, stale));
    }

    let mut details = failures;
    if pending > 0 {
        details.push(format!("{pending} provider(s) did not answer within the budget"));
    }
    if details.is_empty() {
        details.push("no provider returned venues".to_owned());
    }
    Err(DiscoveryError::SearchFailed(details.join("; ")))
}

fn cached_outcome(entry: &CacheEntry, center: Option<GeoPoint>, max_results: usize, stale: bool) -> SearchOutcome {
    let mut venues = entry.venues.clone();
    rank(&mut venues, center);
    outcome(venues, entry.partial, stale, max_results)
}

fn outcome(mut venues: Vec<Venue>, partial: bool, stale: bool, max_results: usize) -> SearchOutcome {
    venues.truncate(max_results);
    SearchOutcome {
        venues,
        partial,
        stale,
    }
}
