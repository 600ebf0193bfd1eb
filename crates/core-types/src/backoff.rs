//! Unified retry and pacing policy.
//!
//! One policy object covers the three places the engine waits: protection
//! cooldowns, navigation retries, and the continue-button polling loop that
//! rides out asynchronous form validation.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded retry schedule with jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Attempts before giving up, counting the first try.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay_ms: u64,

    /// Ceiling for the exponential schedule.
    pub max_delay_ms: u64,

    /// Fraction of the delay added or removed at random, 0.0-1.0.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Default::default()
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry `attempt` (0-indexed): exponential, capped,
    /// jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        Duration::from_millis(apply_jitter(exp, self.jitter))
    }

    /// Whether another attempt is allowed after `attempt` tries.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Jitter a millisecond delay by up to `fraction` in either direction.
pub fn apply_jitter(delay_ms: u64, fraction: f64) -> u64 {
    if fraction <= 0.0 || delay_ms == 0 {
        return delay_ms;
    }
    let spread = (delay_ms as f64 * fraction).round() as i64;
    if spread == 0 {
        return delay_ms;
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    (delay_ms as i64 + offset).max(0) as u64
}

/// Random pacing delay within `[min_ms, max_ms]`, used between actions as an
/// anti-detection measure. Not skippable and not parallelizable: one session
/// drives one DOM.
pub fn pacing_delay(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = BackoffPolicy::new(5, 100)
            .with_max_delay_ms(400)
            .with_jitter(0.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(6), Duration::from_millis(400));
    }

    #[test]
    fn attempt_budget_is_enforced() {
        let policy = BackoffPolicy::new(3, 10);
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let jittered = apply_jitter(1000, 0.2);
            assert!((800..=1200).contains(&jittered));
        }
    }

    #[test]
    fn pacing_delay_respects_range() {
        for _ in 0..50 {
            let delay = pacing_delay(200, 900);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(900));
        }
        assert_eq!(pacing_delay(300, 300), Duration::from_millis(300));
    }
}
