//! # Restart backoff after rapid failures.
//!
//! [`RestartBackoff`] decides how long to wait before an automatic restart.
//! An exit that happens less than [`RestartBackoff::healthy_after`] after the
//! start is a *rapid failure*; consecutive rapid failures grow the delay:
//!
//! ```text
//! delay(n) = min(first × factor^(n-1), max)     n = consecutive rapid failures
//! ```
//!
//! A run that lasted at least `healthy_after` resets the count and restarts
//! immediately. With `max_attempts = Some(k)` the k-th consecutive rapid
//! failure gives up.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{FailureTracker, RestartBackoff, RetryDecision};
//!
//! let backoff = RestartBackoff::default();
//! let mut tracker = FailureTracker::default();
//!
//! // Crashed right away: wait `first`.
//! assert_eq!(
//!     tracker.on_exit(&backoff, Duration::from_millis(20)),
//!     RetryDecision::After { delay: Duration::from_secs(1), attempt: 1 }
//! );
//! // Ran for a minute: restart now, counter reset.
//! assert_eq!(tracker.on_exit(&backoff, Duration::from_secs(60)), RetryDecision::Now);
//! ```

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Delay policy for automatic restarts.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RestartBackoff {
    /// Delay after the first rapid failure.
    #[serde(with = "millis")]
    pub first: Duration,
    /// Upper bound for any delay.
    #[serde(with = "millis")]
    pub max: Duration,
    /// Multiplicative growth per consecutive rapid failure.
    pub factor: f64,
    /// Equal jitter: `delay/2 + random[0, delay/2]`.
    pub jitter: bool,
    /// Minimum uptime for a run to count as healthy.
    #[serde(with = "millis")]
    pub healthy_after: Duration,
    /// Give up after this many consecutive rapid failures (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for RestartBackoff {
    /// first=1s, factor=2.0, max=30s, no jitter, healthy_after=10s, unbounded attempts.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: false,
            healthy_after: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RestartBackoff {
    /// Delay before the restart following the `failures`-th consecutive rapid failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        if self.jitter { equal_jitter(base) } else { base }
    }
}

fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
    if ms < 2 {
        return delay;
    }
    let half = ms / 2;
    Duration::from_millis(half + rand::rng().random_range(0..=ms - half))
}

/// What to do after the child exited on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Healthy run ended: start again immediately.
    Now,
    /// Rapid failure: start again after `delay`.
    After { delay: Duration, attempt: u32 },
    /// Too many rapid failures in a row: stay exited.
    GiveUp { attempts: u32 },
}

/// Counts consecutive rapid failures for one supervised program.
#[derive(Clone, Debug, Default)]
pub struct FailureTracker {
    failures: u32,
}

impl FailureTracker {
    /// Classifies an exit after `uptime` and updates the counter.
    pub fn on_exit(&mut self, backoff: &RestartBackoff, uptime: Duration) -> RetryDecision {
        if uptime >= backoff.healthy_after {
            self.failures = 0;
            return RetryDecision::Now;
        }

        self.failures = self.failures.saturating_add(1);
        if backoff.max_attempts.is_some_and(|n| self.failures >= n) {
            return RetryDecision::GiveUp {
                attempts: self.failures,
            };
        }
        RetryDecision::After {
            delay: backoff.delay(self.failures),
            attempt: self.failures,
        }
    }

    /// Forgets past failures (manual restart).
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    #[inline]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
