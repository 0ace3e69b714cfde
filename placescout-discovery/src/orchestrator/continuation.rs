//! Background enrichment after the client deadline.
//!
//! A continuation owns the receiving end of a query's fan-out once the
//! foreground response has been assembled. Each late batch of hits is merged
//! with everything collected before it and written back to the same cache
//! entry under the orchestration's version. The entry's
//! `enrich_in_progress` flag is cleared when every call has finished or the
//! background cap is reached; in the latter case the entry stays `partial`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::cache::CacheKey;
use crate::types::{GeoPoint, Query};

use super::search::{absorb, assemble, store, CallOutcome, Collected, Shared};

pub(crate) struct Continuation {
    pub(crate) shared: Arc<Shared>,
    pub(crate) query: Query,
    pub(crate) key: CacheKey,
    pub(crate) version: u64,
    pub(crate) collected: Collected,
    pub(crate) pending: usize,
    /// Absolute cap measured from the original dispatch.
    pub(crate) hard_deadline: Instant,
    pub(crate) center: Option<GeoPoint>,
}

impl Continuation {
    /// Drain `rx` until every call has answered or the cap is reached.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CallOutcome>) {
        tracing::debug!(
            key = self.key.as_str(),
            pending = self.pending,
            "background enrichment started"
        );
        let mut failures = Vec::new();

        while self.pending > 0 {
            match timeout_at(self.hard_deadline, rx.recv()).await {
                Ok(Some(outcome)) => {
                    self.pending -= 1;
                    let grew = absorb(outcome, &mut self.collected, &mut failures);
                    if grew && self.pending > 0 && !self.publish(true).await {
                        tracing::debug!(key = self.key.as_str(), "enrichment superseded by a newer search");
                        return;
                    }
                }
                Ok(None) => self.pending = 0,
                Err(_) => {
                    tracing::warn!(
                        key = self.key.as_str(),
                        pending = self.pending,
                        "background enrichment reached its cap"
                    );
                    break;
                }
            }
        }

        if !failures.is_empty() {
            tracing::debug!(failures = failures.len(), "late provider calls failed");
        }
        self.finish().await;
    }

    /// Write the current merge, still flagged as enriching.
    ///
    /// Returns `false` if a newer orchestration owns the key.
    async fn publish(&self, enriching: bool) -> bool {
        let venues = assemble(&self.shared, &self.query, &self.collected, self.center);
        if venues.is_empty() {
            return true;
        }
        store(
            &self.shared,
            self.key.clone(),
            self.version,
            venues,
            self.pending > 0,
            enriching,
        )
        .await
    }

    async fn finish(&self) {
        let venues = assemble(&self.shared, &self.query, &self.collected, self.center);
        if venues.is_empty() {
            // Nothing to write; release an entry we wrote earlier, if any.
            let ours = self
                .shared
                .cache
                .get_stale(&self.key)
                .await
                .is_some_and(|entry| entry.version == self.version);
            if ours {
                self.shared
                    .cache
                    .mark_enrich_in_progress(&self.key, false)
                    .await;
            }
            return;
        }

        let count = venues.len();
        let partial = self.pending > 0;
        let written = store(
            &self.shared,
            self.key.clone(),
            self.version,
            venues,
            partial,
            false,
        )
        .await;
        if written {
            tracing::debug!(
                key = self.key.as_str(),
                venues = count,
                partial,
                "background enrichment finished"
            );
        } else {
            tracing::debug!(key = self.key.as_str(), "enrichment superseded by a newer search");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::DiscoveryConfig;
    use crate::orchestrator::Discovery;
    use crate::types::{ProviderId, RawHit};

    fn hit(provider: &str, name: &str, lat: f64, lon: f64) -> RawHit {
        RawHit::new(ProviderId::new(provider), name).with_location(GeoPoint::new(lat, lon), 10.0)
    }

    #[tokio::test(start_paused = true)]
    async fn cap_leaves_entry_partial_with_enrichment_cleared() {
        let discovery =
            Discovery::with_providers(DiscoveryConfig::default(), Vec::new()).expect("engine");
        let shared = Arc::clone(&discovery.shared);
        let query = Query::new("Lisbon", "coffee");
        let key = CacheKey::for_query(&query);
        let version = shared.cache.next_version();

        let mut collected = Collected::new();
        collected.insert(0, vec![hit("fast", "Café Janis", 38.7075, -9.1449)]);
        let foreground = assemble(&shared, &query, &collected, None);
        assert!(store(&shared, key.clone(), version, foreground, true, true).await);

        // One late call lands before the cap; the other never answers.
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(CallOutcome {
            index: 1,
            provider: ProviderId::new("late"),
            result: Ok(vec![hit("late", "Copenhagen Coffee Lab", 38.7106, -9.1421)]),
        })
        .expect("receiver alive");

        let started = Instant::now();
        Continuation {
            shared: Arc::clone(&shared),
            query,
            key: key.clone(),
            version,
            collected,
            pending: 2,
            hard_deadline: started + Duration::from_secs(2),
            center: None,
        }
        .run(rx)
        .await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        let entry = shared.cache.get(&key).await.expect("entry");
        assert!(entry.partial);
        assert!(!entry.enrich_in_progress);
        assert_eq!(entry.version, version);
        assert_eq!(entry.venues.len(), 2);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_continuation_leaves_newer_entry_alone() {
        let discovery =
            Discovery::with_providers(DiscoveryConfig::default(), Vec::new()).expect("engine");
        let shared = Arc::clone(&discovery.shared);
        let query = Query::new("Lisbon", "coffee");
        let key = CacheKey::for_query(&query);
        let old = shared.cache.next_version();
        let newer = shared.cache.next_version();

        let mut fresh = Collected::new();
        fresh.insert(0, vec![hit("a", "Fábrica Coffee Roasters", 38.7139, -9.1334)]);
        let venues = assemble(&shared, &query, &fresh, None);
        assert!(store(&shared, key.clone(), newer, venues, false, false).await);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(CallOutcome {
            index: 0,
            provider: ProviderId::new("a"),
            result: Ok(vec![hit("a", "Café Janis", 38.7075, -9.1449)]),
        })
        .expect("receiver alive");
        drop(tx);

        Continuation {
            shared: Arc::clone(&shared),
            query,
            key: key.clone(),
            version: old,
            collected: Collected::new(),
            pending: 1,
            hard_deadline: Instant::now() + Duration::from_secs(2),
            center: None,
        }
        .run(rx)
        .await;

        let entry = shared.cache.get(&key).await.expect("entry");
        assert_eq!(entry.version, newer);
        assert_eq!(entry.venues[0].name, "Fábrica Coffee Roasters");
    }
}
