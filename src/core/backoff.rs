//! Bounded waiting with randomized backoff
//!
//! Used by every operation that may block: pulling tasks from a pool and
//! fetching delta ranges. A wait sleeps a jittered, growing interval; after
//! `max_empty_waits` consecutive waits without progress the caller gets a
//! `Timeout` error. This is a stall detector, not a retry-forever policy.

use crate::constants::MAX_BACKOFF_MULTIPLIER;
use crate::core::error::{Error, Result};
use rand::Rng;
use std::time::Duration;

/// Parameters of a bounded wait
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    /// Base sleep interval
    pub interval: Duration,
    /// Consecutive empty waits tolerated before timing out
    pub max_empty_waits: u32,
}

impl WaitPolicy {
    /// Create a new policy
    pub fn new(interval: Duration, max_empty_waits: u32) -> Self {
        Self {
            interval,
            max_empty_waits,
        }
    }

    /// Start a fresh backoff sequence for `stage`
    pub fn backoff(&self, stage: impl Into<String>) -> Backoff {
        Backoff {
            policy: *self,
            stage: stage.into(),
            empty_waits: 0,
        }
    }
}

/// Stateful backoff for one blocked operation
#[derive(Debug)]
pub struct Backoff {
    policy: WaitPolicy,
    stage: String,
    empty_waits: u32,
}

impl Backoff {
    /// Record an empty attempt and sleep, or fail once the budget is spent
    pub fn wait(&mut self) -> Result<()> {
        self.empty_waits += 1;
        if self.empty_waits > self.policy.max_empty_waits {
            return Err(Error::timeout(self.stage.clone(), self.empty_waits - 1));
        }

        std::thread::sleep(self.next_delay());
        Ok(())
    }

    /// Progress was made; restart the sequence
    pub fn reset(&mut self) {
        self.empty_waits = 0;
    }

    /// Consecutive empty waits so far
    pub fn empty_waits(&self) -> u32 {
        self.empty_waits
    }

    fn next_delay(&self) -> Duration {
        let exponent = self.empty_waits.saturating_sub(1).min(3);
        let ceiling = (1u32 << exponent).min(MAX_BACKOFF_MULTIPLIER);
        let base = self.policy.interval.as_micros() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        // Jitter between half the base interval and the current ceiling
        let micros = rand::rng().random_range(base / 2..=base * ceiling as u64);
        Duration::from_micros(micros)
    }
}
