//! Token bucket rate limiting for outbound provider calls.
//!
//! Each HTTP-backed adapter owns one [`TokenBucket`] sized from its
//! `requests_per_minute` quota. Concurrent queries share the bucket, so the
//! upstream sees at most the configured rate regardless of fan-out.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ProviderError;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled at the per-minute quota.
///
/// Capacity is the burst size: the number of calls that may go out back to
/// back on a full bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket allowing `requests_per_minute` calls per minute.
    ///
    /// Returns `None` when the quota is 0, meaning "unlimited".
    pub fn per_minute(requests_per_minute: u32) -> Option<Self> {
        Self::with_burst(requests_per_minute, requests_per_minute)
    }

    /// Like [`TokenBucket::per_minute`], holding at most `burst` tokens.
    ///
    /// A `burst` of 0, or one above the quota, means the whole quota.
    pub fn with_burst(requests_per_minute: u32, burst: u32) -> Option<Self> {
        if requests_per_minute == 0 {
            return None;
        }
        let burst = if burst == 0 {
            requests_per_minute
        } else {
            burst.min(requests_per_minute)
        };
        let capacity = f64::from(burst);
        Some(Self {
            capacity,
            refill_per_sec: f64::from(requests_per_minute) / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Take one token if available, otherwise report how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Wait for a token, giving up if none becomes available within `max_wait`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::RateLimited`] when the wait would exceed `max_wait`.
    pub async fn acquire(&self, max_wait: Duration, provider: &str) -> Result<(), ProviderError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if Instant::now() + wait > deadline {
                        return Err(ProviderError::RateLimited(format!(
                            "{provider} local quota exhausted"
                        )));
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tokens.floor() as u32
    }
}
