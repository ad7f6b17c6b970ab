//! Backoff curves and jitter for retry delays.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay curve between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Fixed delay.
    Constant { delay: Duration },
    /// Delay grows linearly with the attempt number.
    Linear { base: Duration },
    /// Delay doubles each attempt, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Backoff::Exponential { base, max }
    }

    /// Delay before retrying after the given failed attempt (1-indexed).
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base } => base
                .checked_mul(attempt as u32)
                .unwrap_or(Duration::from_secs(u64::MAX)),
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u32.saturating_pow(exponent);
                base.checked_mul(multiplier)
                    .unwrap_or(Duration::from_secs(u64::MAX))
                    .min(*max)
            }
        }
    }
}

/// Randomisation applied on top of the backoff curve, so a burst of failures
/// does not retry in lockstep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Use the exact computed delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// Uniform in `[delay*(1-f), delay*(1+f)]` for a fraction `f` in `[0, 1]`.
    Proportional { fraction: f64 },
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    pub fn proportional(fraction: f64) -> Self {
        Jitter::Proportional { fraction: fraction.clamp(0.0, 1.0) }
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Deterministic variant for tests.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
            Jitter::Proportional { fraction } => {
                let f = fraction.clamp(0.0, 1.0);
                let low = (millis as f64 * (1.0 - f)) as u64;
                let high = (millis as f64 * (1.0 + f)) as u64;
                if low >= high {
                    return delay;
                }
                Duration::from_millis(rng.random_range(low..=high))
            }
        }
    }
}

/// A complete per-class retry schedule: how many attempts, and how long to
/// wait between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySchedule {
    pub max_attempts: usize,
    pub backoff: Backoff,
    pub jitter: Jitter,
}

impl RetrySchedule {
    pub fn new(max_attempts: usize, backoff: Backoff, jitter: Jitter) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff, jitter }
    }

    /// Default for transient provider faults: 3 attempts, 500 ms doubling to
    /// 30 s, ±25% jitter.
    pub fn transient_default() -> Self {
        Self::new(
            3,
            Backoff::exponential(Duration::from_millis(500), Duration::from_secs(30)),
            Jitter::proportional(0.25),
        )
    }

    /// Default for quota rejections: 5 attempts off a longer 2 s base.
    pub fn rate_limited_default() -> Self {
        Self::new(
            5,
            Backoff::exponential(Duration::from_secs(2), Duration::from_secs(30)),
            Jitter::proportional(0.25),
        )
    }

    /// Jittered delay before retrying after the given failed attempt
    /// (1-indexed).
    pub fn delay(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn constant_backoff_is_flat() {
        let b = Backoff::constant(Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let b = Backoff::linear(Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let b = Backoff::exponential(Duration::from_millis(500), Duration::from_secs(30));
        assert_eq!(b.delay(1), Duration::from_millis(500));
        assert_eq!(b.delay(2), Duration::from_millis(1000));
        assert_eq!(b.delay(3), Duration::from_millis(2000));
        assert_eq!(b.delay(10), Duration::from_secs(30));
        assert_eq!(b.delay(64), Duration::from_secs(30));
    }

    #[test]
    fn full_jitter_stays_within_delay() {
        let jitter = Jitter::full();
        let delay = Duration::from_millis(1000);
        for _ in 0..100 {
            assert!(jitter.apply(delay) <= delay);
        }
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let jitter = Jitter::equal();
        let delay = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jitter.apply(delay);
            assert!(d >= Duration::from_millis(500) && d <= delay);
        }
    }

    #[test]
    fn proportional_jitter_stays_within_band() {
        let jitter = Jitter::proportional(0.25);
        let delay = Duration::from_millis(1000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = jitter.apply_with_rng(delay, &mut rng);
            assert!(d >= Duration::from_millis(750), "below band: {d:?}");
            assert!(d <= Duration::from_millis(1250), "above band: {d:?}");
        }
    }

    #[test]
    fn jitter_handles_zero_delay() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::proportional(0.25).apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn schedule_requires_at_least_one_attempt() {
        let s = RetrySchedule::new(0, Backoff::constant(Duration::from_millis(1)), Jitter::None);
        assert_eq!(s.max_attempts, 1);
    }

    #[test]
    fn default_schedules_match_documented_timings() {
        let transient = RetrySchedule::transient_default();
        assert_eq!(transient.max_attempts, 3);
        assert_eq!(transient.backoff.delay(1), Duration::from_millis(500));

        let limited = RetrySchedule::rate_limited_default();
        assert_eq!(limited.max_attempts, 5);
        assert_eq!(limited.backoff.delay(1), Duration::from_secs(2));
    }
}
