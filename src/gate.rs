//! Per-provider admission control: token bucket + circuit breaker + usage
//! counters behind one facade.
//!
//! No outbound call may start without a [`Permit`] from the provider's gate.
//! The permit is RAII: exactly one terminal record reaches the counters and
//! the breaker on every exit path. Dropping a permit without a verdict counts
//! as an abandoned request and is breaker-neutral, since the outcome of the
//! provider call was never observed.

use crate::breaker::{Admission, BreakerConfig, BreakerState, CircuitBreaker};
use crate::error::AgentError;
use crate::limiter::TokenBucket;
use crate::provider::{Provider, Quota};
use crate::time::{Clock, Deadline, Sleeper};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct UsageCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    last_request_millis: AtomicU64,
    latency_total_millis: AtomicU64,
    latency_samples: AtomicU64,
    wait_total_millis: AtomicU64,
    wait_samples: AtomicU64,
}

/// Point-in-time copy of one provider's usage counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub abandoned_requests: u64,
    pub last_request_at_millis: Option<u64>,
    /// Mean latency of successful calls.
    pub avg_latency: Duration,
    /// Mean time spent waiting for a rate-limit permit.
    pub avg_acquire_wait: Duration,
}

/// One provider's admission state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    pub provider: Provider,
    pub breaker: BreakerState,
    pub consecutive_failures: usize,
    pub usage: UsageSnapshot,
}

#[derive(Debug)]
pub struct ProviderGate {
    provider: Provider,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    usage: UsageCounters,
    clock: Arc<dyn Clock>,
}

impl ProviderGate {
    pub fn new(
        provider: Provider,
        quota: Quota,
        breaker_config: BreakerConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            provider,
            bucket: TokenBucket::new(quota, clock.clone(), sleeper),
            breaker: CircuitBreaker::new(breaker_config, clock.clone()),
            usage: UsageCounters::default(),
            clock,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Non-blocking admission: `None` when the breaker blocks or no permit is
    /// available right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        match self.breaker.admit() {
            Admission::Denied => None,
            Admission::Granted { probe } => {
                if self.bucket.try_take() {
                    Some(self.issue(probe))
                } else {
                    self.breaker.on_abandoned(probe);
                    None
                }
            }
        }
    }

    /// Blocking admission with a deadline. Fails immediately with
    /// [`AgentError::BreakerOpen`] when the breaker blocks; otherwise waits
    /// for a rate permit up to the deadline.
    pub async fn acquire(self: &Arc<Self>, deadline: Deadline) -> Result<Permit, AgentError> {
        let probe = match self.breaker.admit() {
            Admission::Denied => return Err(AgentError::BreakerOpen { provider: self.provider }),
            Admission::Granted { probe } => probe,
        };
        match self.bucket.take(deadline).await {
            Ok(waited) => {
                self.usage.wait_total_millis.fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
                self.usage.wait_samples.fetch_add(1, Ordering::Relaxed);
                Ok(self.issue(probe))
            }
            Err(denied) => {
                self.breaker.on_abandoned(probe);
                Err(AgentError::DeadlineExceeded { elapsed: denied.waited })
            }
        }
    }

    pub fn stats(&self) -> GateStats {
        let succeeded = self.usage.succeeded.load(Ordering::Relaxed);
        let latency_samples = self.usage.latency_samples.load(Ordering::Relaxed);
        let wait_samples = self.usage.wait_samples.load(Ordering::Relaxed);
        let last = self.usage.last_request_millis.load(Ordering::Relaxed);
        GateStats {
            provider: self.provider,
            breaker: self.breaker.state(),
            consecutive_failures: self.breaker.consecutive_failures(),
            usage: UsageSnapshot {
                total_requests: self.usage.total.load(Ordering::Relaxed),
                successful_requests: succeeded,
                failed_requests: self.usage.failed.load(Ordering::Relaxed),
                abandoned_requests: self.usage.abandoned.load(Ordering::Relaxed),
                last_request_at_millis: (last != 0).then_some(last),
                avg_latency: mean_millis(
                    self.usage.latency_total_millis.load(Ordering::Relaxed),
                    latency_samples,
                ),
                avg_acquire_wait: mean_millis(
                    self.usage.wait_total_millis.load(Ordering::Relaxed),
                    wait_samples,
                ),
            },
        }
    }

    /// Hot-swap the provider's sustained rate.
    pub fn update_rate(&self, permits_per_sec: f64) {
        tracing::info!(provider = %self.provider, permits_per_sec, "rate updated");
        self.bucket.set_rate(permits_per_sec);
    }

    pub fn current_rate(&self) -> f64 {
        self.bucket.rate()
    }

    /// Manually close the provider's breaker.
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    fn issue(self: &Arc<Self>, probe: bool) -> Permit {
        let now = self.clock.now_millis();
        self.usage.total.fetch_add(1, Ordering::Relaxed);
        self.usage.last_request_millis.store(now.max(1), Ordering::Relaxed);
        Permit { gate: Arc::clone(self), probe, acquired_at_millis: now, done: false }
    }
}

fn mean_millis(total: u64, samples: u64) -> Duration {
    if samples == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(total / samples)
    }
}

/// A single authorisation to make one outbound call. Must be consumed by
/// [`Permit::success`] or [`Permit::failure`]; dropping it records an
/// abandoned request instead.
#[derive(Debug)]
#[must_use = "a permit must be resolved with success() or failure()"]
pub struct Permit {
    gate: Arc<ProviderGate>,
    probe: bool,
    acquired_at_millis: u64,
    done: bool,
}

impl Permit {
    pub fn success(mut self) {
        self.done = true;
        let latency = self
            .gate
            .clock
            .now_millis()
            .saturating_sub(self.acquired_at_millis);
        self.gate.usage.succeeded.fetch_add(1, Ordering::Relaxed);
        self.gate.usage.latency_total_millis.fetch_add(latency, Ordering::Relaxed);
        self.gate.usage.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.gate.breaker.on_success(self.probe);
    }

    pub fn failure(mut self, error: &AgentError) {
        self.done = true;
        self.gate.usage.failed.fetch_add(1, Ordering::Relaxed);
        if error.counts_against_breaker() {
            self.gate.breaker.on_failure(self.probe);
        } else {
            self.gate.breaker.on_abandoned(self.probe);
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.done {
            self.gate.usage.abandoned.fetch_add(1, Ordering::Relaxed);
            self.gate.breaker.on_abandoned(self.probe);
        }
    }
}

/// The full set of gates, one per provider, built at startup.
#[derive(Debug, Clone)]
pub struct ProviderGates {
    gates: HashMap<Provider, Arc<ProviderGate>>,
}

impl ProviderGates {
    pub fn new(
        quota_overrides: &HashMap<Provider, Quota>,
        breaker_config: BreakerConfig,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let gates = Provider::ALL
            .into_iter()
            .map(|p| {
                let quota = quota_overrides.get(&p).copied().unwrap_or_else(|| p.default_quota());
                let gate = ProviderGate::new(
                    p,
                    quota,
                    breaker_config.clone(),
                    clock.clone(),
                    sleeper.clone(),
                );
                (p, Arc::new(gate))
            })
            .collect();
        Self { gates }
    }

    pub fn gate(&self, provider: Provider) -> &Arc<ProviderGate> {
        self.gates
            .get(&provider)
            .expect("gates are built for every provider at startup")
    }

    /// Stats for every provider, sorted by provider name.
    pub fn snapshot(&self) -> Vec<GateStats> {
        let mut stats: Vec<GateStats> = self.gates.values().map(|g| g.stats()).collect();
        stats.sort_by_key(|s| s.provider);
        stats
    }

    pub fn reset_all(&self) {
        for gate in self.gates.values() {
            gate.reset_breaker();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{AdvancingSleeper, ManualClock};

    fn gate(rate: f64, burst: f64) -> (Arc<ProviderGate>, ManualClock) {
        let clock = ManualClock::new();
        let sleeper = AdvancingSleeper::new(clock.clone());
        let gate = ProviderGate::new(
            Provider::Perplexity,
            Quota::new(rate, burst),
            BreakerConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(sleeper),
        );
        (Arc::new(gate), clock)
    }

    fn transient() -> AgentError {
        AgentError::Transient { provider: Provider::Perplexity, message: "503".into() }
    }

    #[tokio::test]
    async fn success_path_updates_counters() {
        let (gate, clock) = gate(10.0, 10.0);
        let permit = gate.acquire(Deadline::never()).await.unwrap();
        clock.advance(40);
        permit.success();

        let stats = gate.stats();
        assert_eq!(stats.usage.total_requests, 1);
        assert_eq!(stats.usage.successful_requests, 1);
        assert_eq!(stats.usage.failed_requests, 0);
        assert_eq!(stats.usage.avg_latency, Duration::from_millis(40));
        assert!(stats.usage.last_request_at_millis.is_some());
    }

    #[tokio::test]
    async fn five_provider_failures_open_the_breaker() {
        let (gate, _clock) = gate(100.0, 100.0);
        for _ in 0..5 {
            let permit = gate.acquire(Deadline::never()).await.unwrap();
            permit.failure(&transient());
        }
        assert_eq!(gate.stats().breaker, BreakerState::Open);
        assert!(gate.try_acquire().is_none());

        let err = gate.acquire(Deadline::never()).await.unwrap_err();
        assert!(err.is_breaker_open());
    }

    #[tokio::test]
    async fn breaker_reopens_probe_after_cool_down() {
        let (gate, clock) = gate(100.0, 100.0);
        for _ in 0..5 {
            let permit = gate.acquire(Deadline::never()).await.unwrap();
            permit.failure(&transient());
        }
        assert!(gate.try_acquire().is_none());

        clock.advance(60_000);
        let probe = gate.try_acquire().expect("one probe after cool-down");
        probe.success();
        assert_eq!(gate.stats().breaker, BreakerState::Closed);
    }

    #[tokio::test]
    async fn client_side_errors_do_not_trip_the_breaker() {
        let (gate, _clock) = gate(100.0, 100.0);
        for _ in 0..20 {
            let permit = gate.acquire(Deadline::never()).await.unwrap();
            permit.failure(&AgentError::Parse("bad json".into()));
        }
        assert_eq!(gate.stats().breaker, BreakerState::Closed);
        assert_eq!(gate.stats().usage.failed_requests, 20);
    }

    #[tokio::test]
    async fn dropped_permit_is_recorded_as_abandoned() {
        let (gate, _clock) = gate(100.0, 100.0);
        {
            let _permit = gate.acquire(Deadline::never()).await.unwrap();
            // dropped without a verdict (cancelled call)
        }
        let stats = gate.stats();
        assert_eq!(stats.usage.abandoned_requests, 1);
        assert_eq!(stats.breaker, BreakerState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn acquire_denies_past_deadline_without_recording_an_outcome() {
        let (gate, clock) = gate(0.5, 1.0);
        assert!(gate.try_acquire().is_some_and(|p| {
            p.success();
            true
        }));

        let deadline = Deadline::after(&clock, Duration::from_millis(100));
        let err = gate.acquire(deadline).await.unwrap_err();
        assert!(err.is_deadline());
        // The denied acquisition is not a request against the provider.
        assert_eq!(gate.stats().usage.total_requests, 1);
    }

    #[tokio::test]
    async fn rate_hot_swap_is_visible() {
        let (gate, _clock) = gate(0.17, 1.0);
        assert!((gate.current_rate() - 0.17).abs() < 1e-9);
        gate.update_rate(45.0);
        assert!((gate.current_rate() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn gates_cover_every_provider() {
        let clock = ManualClock::new();
        let gates = ProviderGates::new(
            &HashMap::new(),
            BreakerConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(AdvancingSleeper::new(clock)),
        );
        let snapshot = gates.snapshot();
        assert_eq!(snapshot.len(), Provider::ALL.len());
        for pair in snapshot.windows(2) {
            assert!(pair[0].provider < pair[1].provider);
        }
    }
}
