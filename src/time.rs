//! Time abstractions: a fakeable monotonic clock, absolute deadlines, and a
//! pluggable sleeper.
//!
//! Every time-dependent policy (rate limiter, breaker, retry backoff) reads
//! the clock and sleeps through these traits, so tests can run long-horizon
//! scenarios instantly. The production impls are tokio-backed and therefore
//! honour `tokio::time::pause`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monotonic clock in milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Clock backed by `tokio::time::Instant`, so paused-time tests can advance it.
#[derive(Debug, Clone)]
pub struct TokioClock {
    start: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self { start: tokio::time::Instant::now() }
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Hand-cranked clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// An absolute point on a [`Clock`] by which an operation must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at_millis: u64,
}

impl Deadline {
    /// A deadline `budget` from now on the given clock.
    pub fn after(clock: &dyn Clock, budget: Duration) -> Self {
        Self { at_millis: clock.now_millis().saturating_add(budget.as_millis() as u64) }
    }

    /// A deadline that never arrives.
    pub fn never() -> Self {
        Self { at_millis: u64::MAX }
    }

    pub fn at_millis(&self) -> u64 {
        self.at_millis
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now_millis() >= self.at_millis
    }

    /// Time left before the deadline; zero once expired.
    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        Duration::from_millis(self.at_millis.saturating_sub(clock.now_millis()))
    }
}

/// Abstraction over waiting, so retry and rate-limit tests need no real time.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Sleeper that returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

/// Sleeper that records every requested duration without waiting.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

#[async_trait]
impl Sleeper for TrackingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(duration);
    }
}

/// Test sleeper that advances a [`ManualClock`] instead of waiting, keeping
/// wait loops that re-read the clock deterministic.
#[derive(Debug, Clone)]
pub struct AdvancingSleeper {
    clock: ManualClock,
}

impl AdvancingSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Sleeper for AdvancingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.clock.advance(duration.as_millis() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), 0);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 250);
    }

    #[test]
    fn deadline_expiry_and_remaining() {
        let clock = ManualClock::new();
        let deadline = Deadline::after(&clock, Duration::from_millis(100));
        assert!(!deadline.expired(&clock));
        assert_eq!(deadline.remaining(&clock), Duration::from_millis(100));

        clock.advance(60);
        assert_eq!(deadline.remaining(&clock), Duration::from_millis(40));

        clock.advance(60);
        assert!(deadline.expired(&clock));
        assert_eq!(deadline.remaining(&clock), Duration::ZERO);
    }

    #[test]
    fn never_deadline_does_not_expire() {
        let clock = ManualClock::new();
        clock.advance(u64::MAX / 2);
        assert!(!Deadline::never().expired(&clock));
    }

    #[tokio::test]
    async fn tracking_sleeper_records_without_waiting() {
        let sleeper = TrackingSleeper::new();
        sleeper.sleep(Duration::from_millis(100)).await;
        sleeper.sleep(Duration::from_millis(200)).await;
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(sleeper.total(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn advancing_sleeper_moves_the_clock() {
        let clock = ManualClock::new();
        let sleeper = AdvancingSleeper::new(clock.clone());
        sleeper.sleep(Duration::from_millis(750)).await;
        assert_eq!(clock.now_millis(), 750);
    }

    #[tokio::test]
    async fn tokio_clock_tracks_paused_time() {
        tokio::time::pause();
        let clock = TokioClock::default();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(clock.now_millis() >= 5_000);
    }
}
