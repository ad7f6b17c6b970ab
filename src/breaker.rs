//! Circuit breaker: a finite-state gate that stops calls to a provider after
//! repeated failures.
//!
//! Lock-free: the state word, failure count, and probe count are atomics with
//! CAS transitions. Admission and outcome recording are split so the caller
//! can hold a permit across the outbound call; a probe slot taken at
//! admission must be returned by exactly one of `on_success`, `on_failure`,
//! or `on_abandoned`.

use crate::time::Clock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive provider-attributable failures before the breaker opens.
    pub failure_threshold: usize,
    /// How long the breaker stays open before letting probes through.
    pub cool_down: Duration,
    /// Maximum concurrent probes while half-open.
    pub probe_limit: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
            probe_limit: 3,
        }
    }
}

/// Result of asking the breaker whether a call may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted { probe: bool },
    Denied,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    opened_at_millis: AtomicU64,
    probes_in_flight: AtomicUsize,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            probes_in_flight: AtomicUsize::new(0),
            config,
            clock,
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Ask to let one call through. A granted probe slot must be returned via
    /// one of the `on_*` calls.
    pub fn admit(&self) -> Admission {
        loop {
            match self.state.load(Ordering::Acquire) {
                STATE_CLOSED => return Admission::Granted { probe: false },
                STATE_OPEN => {
                    let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed < self.config.cool_down.as_millis() as u64 {
                        return Admission::Denied;
                    }
                    match self.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.probes_in_flight.store(1, Ordering::Release);
                            tracing::info!("circuit breaker half-open, probing");
                            return Admission::Granted { probe: true };
                        }
                        // Lost the race; re-read whatever state won.
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.probes_in_flight.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.probe_limit {
                        self.release_probe();
                        return Admission::Denied;
                    }
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.probe_limit,
                        "circuit breaker probe admitted"
                    );
                    return Admission::Granted { probe: true };
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }
    }

    pub fn on_success(&self, probe: bool) {
        if probe {
            self.release_probe();
        }
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.consecutive_failures.store(0, Ordering::Release);
                    self.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker closed");
                }
            }
            STATE_CLOSED => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Record a provider-attributable failure.
    pub fn on_failure(&self, probe: bool) {
        if probe {
            self.release_probe();
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker probe failed, reopening");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker open"
                    );
                }
            }
            _ => {}
        }
    }

    /// Return a permit without a verdict on the provider: client-side errors
    /// and cancelled calls land here. Releases the probe slot, moves nothing.
    pub fn on_abandoned(&self, probe: bool) {
        if probe {
            self.release_probe();
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
        self.probes_in_flight.store(0, Ordering::Release);
        tracing::info!("circuit breaker manually reset");
    }

    fn release_probe(&self) {
        let _ = self.probes_in_flight.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |v| v.checked_sub(1),
        );
    }
}
