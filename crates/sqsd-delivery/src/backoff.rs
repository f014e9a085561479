//! Exponential backoff with jitter for queue receive errors.
//!
//! The receiver never gives up on the queue: each consecutive failure doubles
//! the pause up to a cap, and a successful poll resets the sequence.

use std::time::Duration;

use rand::Rng;

/// Default delay after the first receive failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter as a fraction of the computed delay.
pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;

/// Stateful exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_JITTER_FACTOR)
    }
}

impl Backoff {
    /// Creates a backoff with the given base delay, cap, and jitter factor.
    ///
    /// The jitter factor is clamped to `0.0..=1.0`.
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self { base_delay, max_delay, jitter_factor: jitter_factor.clamp(0.0, 1.0), attempt: 0 }
    }

    /// Returns the number of consecutive failures recorded.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns how long to wait before the next try.
    ///
    /// The result never exceeds the configured maximum delay.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(20);
        self.attempt = self.attempt.saturating_add(1);

        let multiplier = 2_u32.saturating_pow(exponent);
        let capped = std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay);

        std::cmp::min(apply_jitter(capped, self.jitter_factor), self.max_delay)
    }

    /// Resets the sequence after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Randomizes `duration` by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let jitter_range = duration.as_secs_f64() * jitter_factor;
    let jitter_offset = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((duration.as_secs_f64() + jitter_offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 0.0);

        let delays: Vec<_> = (0..7).map(|_| backoff.next_delay()).collect();

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 30, 30].map(Duration::from_secs).to_vec(),
            "delays should double and stop at the cap"
        );
        assert_eq!(backoff.attempt(), 7);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 0.0);
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let mut backoff = Backoff::default();

        for _ in 0..100 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(750), "delay {delay:?} below jitter range");
            assert!(delay <= Duration::from_millis(1250), "delay {delay:?} above jitter range");
        }
    }

    #[test]
    fn many_failures_do_not_overflow() {
        let mut backoff = Backoff::default();
        for _ in 0..1000 {
            assert!(backoff.next_delay() <= DEFAULT_MAX_DELAY);
        }
    }
}
