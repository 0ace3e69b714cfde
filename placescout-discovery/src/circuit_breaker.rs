//! Per-provider circuit breaker and latency tracking.
//!
//! Tracks consecutive failures per provider and temporarily disables
//! providers that fail repeatedly, so the orchestrator does not spend its
//! budget on dead sources. After the backoff elapses, exactly one trial call
//! decides whether to restore or re-open the circuit.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  backoff    ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └────────┘             └────┬─────┘
//!     │                         ▲                      │
//!     │  success                │  failure (2x backoff) │
//!     └─────────────────────────┴──────────────────────┘
//! ```
//!
//! The set of providers is fixed at construction. Each record sits behind its
//! own lock, so updates for different providers never contend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::error::ProviderError;
use crate::types::ProviderId;

/// Circuit state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Provider is healthy; every query dispatches to it.
    Closed,
    /// Provider failed too often; skipped until `disabled_until`.
    Open,
    /// Backoff elapsed; one trial call is allowed.
    HalfOpen,
}

/// Health record for a single provider.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub provider_id: ProviderId,
    pub state: CircuitState,
    /// Number of consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// While `Open`, the instant the provider becomes eligible for a trial.
    pub disabled_until: Option<Instant>,
    /// Exponentially weighted moving average of call latency.
    pub ewma_latency_ms: f64,
    /// Backoff applied the next time the circuit opens.
    pub backoff: Duration,
    trial_in_flight: bool,
    samples: u64,
}

impl ProviderHealth {
    fn new(provider_id: ProviderId, base_backoff: Duration) -> Self {
        Self {
            provider_id,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            disabled_until: None,
            ewma_latency_ms: 0.0,
            backoff: base_backoff,
            trial_in_flight: false,
            samples: 0,
        }
    }

    fn observe_latency(&mut self, latency: Duration, alpha: f64) {
        let sample = latency.as_secs_f64() * 1000.0;
        self.ewma_latency_ms = if self.samples == 0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * self.ewma_latency_ms
        };
        self.samples += 1;
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.disabled_until = Some(now + self.backoff);
    }
}

/// Process-wide circuit breaker over the registered providers.
#[derive(Debug)]
pub struct ProviderHealthTracker {
    config: HealthConfig,
    providers: HashMap<ProviderId, Mutex<ProviderHealth>>,
}

impl ProviderHealthTracker {
    /// Create a tracker with a zeroed, `Closed` record for every provider.
    pub fn new(config: HealthConfig, providers: impl IntoIterator<Item = ProviderId>) -> Self {
        let base = Duration::from_millis(config.base_backoff_ms);
        let providers = providers
            .into_iter()
            .map(|id| (id.clone(), Mutex::new(ProviderHealth::new(id, base))))
            .collect();
        Self { config, providers }
    }

    fn with_record<T>(
        &self,
        id: &ProviderId,
        f: impl FnOnce(&mut ProviderHealth) -> T,
    ) -> Option<T> {
        let record = self.providers.get(id)?;
        let mut guard = record.lock().unwrap_or_else(|e| e.into_inner());
        Some(f(&mut guard))
    }

    /// Decide whether a call to `id` should be dispatched now.
    ///
    /// - `Closed`: always `true`
    /// - `Open`: `false` until `disabled_until`, then transitions to
    ///   `HalfOpen` and claims the trial slot (`true`)
    /// - `HalfOpen`: `true` only if the trial slot is free
    ///
    /// Unknown providers are never eligible.
    pub fn is_eligible(&self, id: &ProviderId) -> bool {
        self.with_record(id, |health| match health.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = health
                    .disabled_until
                    .map_or(true, |until| Instant::now() >= until);
                if elapsed {
                    health.state = CircuitState::HalfOpen;
                    health.trial_in_flight = true;
                    tracing::info!(provider = %id, "circuit half-open, dispatching trial call");
                }
                elapsed
            }
            CircuitState::HalfOpen => {
                if health.trial_in_flight {
                    false
                } else {
                    health.trial_in_flight = true;
                    true
                }
            }
        })
        .unwrap_or(false)
    }

    /// Record a successful call.
    ///
    /// Resets the failure count and backoff and closes the circuit.
    pub fn record_success(&self, id: &ProviderId, latency: Duration) {
        let alpha = self.config.ewma_alpha;
        let base = Duration::from_millis(self.config.base_backoff_ms);
        self.with_record(id, |health| {
            health.observe_latency(latency, alpha);
            if health.state != CircuitState::Closed {
                tracing::info!(provider = %id, "circuit closed after successful call");
            }
            health.state = CircuitState::Closed;
            health.consecutive_failures = 0;
            health.disabled_until = None;
            health.backoff = base;
            health.trial_in_flight = false;
        });
    }

    /// Record a failed call.
    ///
    /// Opens the circuit once the failure threshold is reached. A failed
    /// half-open trial re-opens it with double the previous backoff, capped
    /// at `max_backoff_ms`.
    pub fn record_failure(&self, id: &ProviderId, latency: Duration, error: &ProviderError) {
        let alpha = self.config.ewma_alpha;
        let threshold = self.config.failure_threshold;
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        self.with_record(id, |health| {
            health.observe_latency(latency, alpha);
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            let now = Instant::now();
            match health.state {
                CircuitState::HalfOpen => {
                    health.backoff = (health.backoff * 2).min(max_backoff);
                    health.trial_in_flight = false;
                    health.open(now);
                    tracing::warn!(
                        provider = %id,
                        error = error.kind(),
                        backoff_ms = health.backoff.as_millis() as u64,
                        "trial call failed, circuit re-opened"
                    );
                }
                CircuitState::Closed if health.consecutive_failures >= threshold => {
                    health.open(now);
                    tracing::warn!(
                        provider = %id,
                        error = error.kind(),
                        failures = health.consecutive_failures,
                        backoff_ms = health.backoff.as_millis() as u64,
                        "circuit opened"
                    );
                }
                // Late failures from calls dispatched before the circuit opened.
                CircuitState::Closed | CircuitState::Open => {}
            }
        });
    }

    /// Current circuit state, or `None` for an unknown provider.
    pub fn state(&self, id: &ProviderId) -> Option<CircuitState> {
        self.with_record(id, |health| health.state)
    }

    /// Copy of one provider's record.
    pub fn health(&self, id: &ProviderId) -> Option<ProviderHealth> {
        self.with_record(id, |health| health.clone())
    }

    /// Copies of every record, sorted by provider id.
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let mut records: Vec<ProviderHealth> = self
            .providers
            .values()
            .map(|record| record.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect();
        records.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        records
    }
}
