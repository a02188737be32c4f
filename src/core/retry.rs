use rand::Rng;
use std::time::Duration;

use crate::scraper::error::FetchError;

/// Exponential backoff: `min(base * multiplier^attempt, max)`, optionally jittered.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: f64,
}

/// Progress of the retries of one strategy for one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub next_delay: Option<Duration>,
    pub elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier: backoff_multiplier.max(1.0),
            jitter: 0.0,
        }
    }

    /// A policy that never retries in place.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Fraction of each delay that may be shaved off at random. Clamped to `[0, 0.99]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// `attempt` counts retries already made, starting at 0.
    pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
        attempt < self.max_retries && error.is_recoverable()
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }

        Duration::from_nanos(nanos.round() as u64)
    }

    /// [`next_delay`](Self::next_delay) minus a random share of at most `jitter`.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.next_delay(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let shave = rand::rng().random_range(0.0..self.jitter);
        delay.mul_f64(1.0 - shave)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_backoff(&mut self, delay: Duration) {
        self.attempt += 1;
        self.next_delay = Some(delay);
        self.elapsed += delay;
    }
}
