use std::time::Duration;

use rand::Rng;

const JITTER_FRACTION: f64 = 0.2;
const MAX_EXPONENT: u32 = 32;

/// Jittered exponential backoff for the consumer loop.
///
/// Each call to `next_delay` doubles the base delay up to `max` and applies
/// up to ±20% jitter. `reset` returns to `initial` after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for the current attempt.
    pub fn base_delay(&self) -> Duration {
        let pow = 2f64.powi(self.attempt.min(MAX_EXPONENT) as i32);
        let scaled = if pow.is_finite() {
            self.initial.mul_f64(pow)
        } else {
            self.max
        };
        scaled.min(self.max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        let factor = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
        base.mul_f64(factor)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
