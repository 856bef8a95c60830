//! Bounded retry schedule for per-item generation attempts.

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::humantime_duration;
use crate::providers::GenerationError;

/// How many times to retry an item and how long to wait in between.
///
/// An item gets `1 + max_retries` attempts. Delays grow exponentially from
/// `min_delay` up to `max_delay`; a rate limit's `retry_after` wins when it
/// is longer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,

    #[serde(with = "humantime_duration")]
    pub min_delay: Duration,

    #[serde(with = "humantime_duration")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Total attempts per item.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// A fresh delay schedule for one item.
    pub fn schedule(&self) -> RetrySchedule {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries as usize)
            .build();
        RetrySchedule { backoff }
    }
}

/// Per-item iterator over retry delays.
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
}

impl RetrySchedule {
    /// Delay before retrying after `error`, or `None` when the error is final
    /// or the schedule is exhausted.
    pub fn next_delay(&mut self, error: &GenerationError) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        let delay = self.backoff.next()?;
        Some(match error.retry_after() {
            Some(requested) if requested > delay => requested,
            _ => delay,
        })
    }
}
