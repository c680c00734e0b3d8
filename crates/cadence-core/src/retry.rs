//! Explicit retry policy for external calls.
//!
//! Retry behavior is modeled as a policy object injected into the sync
//! planner, the webhook pipeline, and the tracker client, rather than
//! ad-hoc loops at each call site. Delays are computable without sleeping,
//! so policies can be unit-tested with no clock.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy: capped exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (so `3` means one
    /// initial attempt plus two retries).
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Multiplicative backoff factor between retries.
    pub multiplier: u32,

    /// Upper bound on any single delay.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Maximum random jitter added to each delay, in milliseconds.
    pub jitter_millis: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2,
            max_delay: Duration::from_secs(10),
            jitter_millis: 50,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
            jitter_millis: 0,
        }
    }

    /// Returns the backoff delay before retry number `retry` (1-indexed),
    /// without jitter.
    ///
    /// `retry = 1` yields `base_delay`, `retry = 2` yields
    /// `base_delay * multiplier`, and so on, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self
            .multiplier
            .max(1)
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Returns the delay with jitter applied, suitable for sleeping.
    #[must_use]
    pub fn jittered_delay_for(&self, retry: u32) -> Duration {
        let jitter = Duration::from_millis(rand_jitter(self.jitter_millis));
        self.delay_for(retry) + jitter
    }

    /// Runs `op` with retries.
    ///
    /// `op` receives the attempt number (1-indexed). Errors for which
    /// `is_retryable` returns `false` are returned immediately; retryable
    /// errors are retried with backoff until `max_attempts` is exhausted,
    /// at which point the last error is returned.
    ///
    /// # Errors
    ///
    /// Returns the final error once attempts are exhausted, or the first
    /// non-retryable error.
    pub async fn run<T, E, F, Fut, P>(&self, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && is_retryable(&err) => {
                    tokio::time::sleep(self.jittered_delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Generates random jitter in `[0, max_millis)`.
fn rand_jitter(max_millis: u64) -> u64 {
    if max_millis == 0 {
        return 0;
    }
    // Subsecond nanos as a cheap entropy source
    // (avoids a rand dependency in the core crate).
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % max_millis
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
