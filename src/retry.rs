//! Class-aware retry: transient faults and quota rejections are retried on
//! separate schedules; everything else surfaces immediately.
//!
//! The runner never invokes fallbacks itself; it reports whether the failure
//! is fallback-eligible and the dispatch layer takes it from there.

use crate::backoff::RetrySchedule;
use crate::error::{AgentError, ErrorClass};
use crate::time::{Clock, Deadline, Sleeper};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Per-provider retry timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryTimings {
    pub transient: RetrySchedule,
    pub rate_limited: RetrySchedule,
    /// Consecutive breaker denials before the provider is declared down.
    pub breaker_probe_attempts: usize,
}

impl Default for RetryTimings {
    fn default() -> Self {
        Self {
            transient: RetrySchedule::transient_default(),
            rate_limited: RetrySchedule::rate_limited_default(),
            breaker_probe_attempts: 2,
        }
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// All retryable attempts were used up.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: AgentError },

    /// A non-retryable failure surfaced on the first attempt it appeared.
    #[error("{0}")]
    Fatal(AgentError),

    /// The breaker stayed open across probe attempts.
    #[error("{0}")]
    ProviderDown(AgentError),

    /// The caller's deadline passed during an attempt or a backoff wait.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },
}

impl RetryError {
    /// Whether the dispatch layer should hand this task to a local fallback.
    pub fn fallback_eligible(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. } | RetryError::ProviderDown(_))
    }
}

/// Drives an operation through its retry schedule.
#[derive(Debug, Clone)]
pub struct RetryRunner {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryRunner {
    pub fn new(clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { clock, sleeper }
    }

    /// Attempt `operation` until it succeeds, the class budget runs out, or a
    /// terminal condition appears.
    pub async fn run<T, F, Fut>(
        &self,
        timings: &RetryTimings,
        deadline: Deadline,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let started = self.clock.now_millis();
        let mut transient_attempts = 0usize;
        let mut limited_attempts = 0usize;
        let mut breaker_denials = 0usize;

        loop {
            if deadline.expired(self.clock.as_ref()) {
                return Err(self.deadline_error(started));
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::NonRetryable => return Err(RetryError::Fatal(err)),
                ErrorClass::ProviderDown => return Err(RetryError::ProviderDown(err)),
                ErrorClass::Timeout => return Err(self.deadline_error(started)),
                class @ (ErrorClass::Transient | ErrorClass::RateLimited) => {
                    if err.is_breaker_open() {
                        breaker_denials += 1;
                        if breaker_denials >= timings.breaker_probe_attempts {
                            tracing::warn!(error = %err, "breaker still open after probes, provider treated as down");
                            return Err(RetryError::ProviderDown(err));
                        }
                    } else {
                        breaker_denials = 0;
                    }

                    let (schedule, attempts) = if class == ErrorClass::Transient {
                        (&timings.transient, &mut transient_attempts)
                    } else {
                        (&timings.rate_limited, &mut limited_attempts)
                    };
                    *attempts += 1;
                    if *attempts >= schedule.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: transient_attempts + limited_attempts,
                            last: err,
                        });
                    }

                    let mut delay = schedule.delay(*attempts);
                    if let AgentError::RateLimited { retry_after: Some(hint), .. } = &err {
                        delay = delay.max(*hint);
                    }
                    if delay >= deadline.remaining(self.clock.as_ref()) {
                        return Err(self.deadline_error(started));
                    }
                    tracing::debug!(
                        attempt = *attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    fn deadline_error(&self, started_millis: u64) -> RetryError {
        let elapsed = self.clock.now_millis().saturating_sub(started_millis);
        RetryError::DeadlineExceeded { elapsed: Duration::from_millis(elapsed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{Backoff, Jitter};
    use crate::provider::Provider;
    use crate::time::{ManualClock, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn timings() -> RetryTimings {
        RetryTimings {
            transient: RetrySchedule::new(
                3,
                Backoff::exponential(Duration::from_millis(500), Duration::from_secs(30)),
                Jitter::None,
            ),
            rate_limited: RetrySchedule::new(
                5,
                Backoff::exponential(Duration::from_secs(2), Duration::from_secs(30)),
                Jitter::None,
            ),
            breaker_probe_attempts: 2,
        }
    }

    fn runner() -> (RetryRunner, ManualClock, TrackingSleeper) {
        let clock = ManualClock::new();
        let sleeper = TrackingSleeper::new();
        (RetryRunner::new(Arc::new(clock.clone()), Arc::new(sleeper.clone())), clock, sleeper)
    }

    fn transient() -> AgentError {
        AgentError::Transient { provider: Provider::OpenAi, message: "502".into() }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_sleep() {
        let (runner, _clock, sleeper) = runner();
        let out = runner
            .run(&timings(), Deadline::never(), || async { Ok::<_, AgentError>(42) })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_use_exactly_max_attempts() {
        let (runner, _clock, sleeper) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let err = runner
            .run(&timings(), Deadline::never(), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert!(err.fallback_eligible());
        // 2 backoff sleeps between 3 attempts: 500ms, 1000ms
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn rate_limited_gets_the_longer_budget() {
        let (runner, _clock, sleeper) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let err = runner
            .run(&timings(), Deadline::never(), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::RateLimited {
                        provider: Provider::Perplexity,
                        retry_after: None,
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(err, RetryError::Exhausted { attempts: 5, .. }));
        assert_eq!(sleeper.calls()[0], Duration::from_secs(2));
    }

    #[tokio::test]
    async fn non_retryable_short_circuits_without_fallback() {
        let (runner, _clock, sleeper) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let err = runner
            .run(&timings(), Deadline::never(), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::InvalidInput("missing paperId".into()))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Fatal(_)));
        assert!(!err.fallback_eligible());
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn persistent_breaker_denials_become_provider_down() {
        let (runner, _clock, _sleeper) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let err = runner
            .run(&timings(), Deadline::never(), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::BreakerOpen { provider: Provider::Anthropic })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, RetryError::ProviderDown(_)));
        assert!(err.fallback_eligible());
    }

    #[tokio::test]
    async fn retry_after_hint_stretches_the_delay() {
        let (runner, _clock, sleeper) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let _ = runner
            .run(&timings(), Deadline::never(), || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AgentError::RateLimited {
                            provider: Provider::Crossref,
                            retry_after: Some(Duration::from_secs(10)),
                        })
                    } else {
                        Ok(1)
                    }
                }
            })
            .await;

        assert_eq!(sleeper.calls(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn backoff_that_would_pass_the_deadline_aborts() {
        let (runner, clock, sleeper) = runner();
        let deadline = Deadline::after(&clock, Duration::from_millis(300));

        let err = runner
            .run(&timings(), deadline, || async { Err::<(), _>(transient()) })
            .await
            .unwrap_err();

        // first backoff (500ms) exceeds remaining (300ms): abort, no sleep
        assert!(matches!(err, RetryError::DeadlineExceeded { .. }));
        assert!(!err.fallback_eligible());
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn deadline_error_from_operation_is_terminal() {
        let (runner, _clock, _sleeper) = runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let err = runner
            .run(&timings(), Deadline::never(), || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::DeadlineExceeded { elapsed: Duration::from_secs(1) })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::DeadlineExceeded { .. }));
    }
}
