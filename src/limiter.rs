//! Per-provider token bucket.
//!
//! Tokens accrue continuously at the configured rate up to the burst
//! capacity. The bucket starts full. The state lock is held only to refill
//! and take; waits happen outside it through the [`Sleeper`].

use crate::adaptive::Adaptive;
use crate::provider::Quota;
use crate::time::{Clock, Deadline, Sleeper};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returned by [`TokenBucket::take`] when no permit can arrive in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldExceedDeadline {
    /// How long the caller had already waited when the take was abandoned.
    pub waited: Duration,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill_millis: u64,
}

#[derive(Debug)]
pub struct TokenBucket {
    rate: Adaptive<f64>,
    burst: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl TokenBucket {
    pub fn new(quota: Quota, clock: Arc<dyn Clock>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            rate: Adaptive::new(quota.permits_per_sec.max(f64::MIN_POSITIVE)),
            burst: quota.burst.max(1.0),
            state: Mutex::new(BucketState {
                tokens: quota.burst.max(1.0),
                last_refill_millis: clock.now_millis(),
            }),
            clock,
            sleeper,
        }
    }

    /// Sustained permits per second currently in force.
    pub fn rate(&self) -> f64 {
        self.rate.load()
    }

    /// Hot-swap the sustained rate. Callers mid-wait pick the new rate up on
    /// their next refill.
    pub fn set_rate(&self, permits_per_sec: f64) {
        self.rate.set(permits_per_sec.max(f64::MIN_POSITIVE));
    }

    /// Non-blocking take. Returns `false` when no whole token is available.
    pub fn try_take(&self) -> bool {
        let mut st = self.lock_state();
        let now = self.clock.now_millis();
        self.refill(&mut st, now);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Blocking take with a deadline. Returns the time spent waiting, or
    /// [`WouldExceedDeadline`] once the next token cannot arrive in time.
    pub async fn take(&self, deadline: Deadline) -> Result<Duration, WouldExceedDeadline> {
        let started = self.clock.now_millis();
        loop {
            let wait = {
                let mut st = self.lock_state();
                let now = self.clock.now_millis();
                self.refill(&mut st, now);
                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return Ok(Duration::from_millis(now.saturating_sub(started)));
                }
                let deficit = 1.0 - st.tokens;
                // Floor at 1ms so rounding can never produce a zero-length
                // sleep and a hot loop.
                Duration::from_secs_f64(deficit / self.rate.load()).max(Duration::from_millis(1))
            };

            let now = self.clock.now_millis();
            let waited = Duration::from_millis(now.saturating_sub(started));
            // Tokens only accrue at the configured rate, so the projected
            // arrival is a lower bound; competing takers can only push it out.
            if now.saturating_add(wait.as_millis() as u64) > deadline.at_millis() {
                return Err(WouldExceedDeadline { waited });
            }
            self.sleeper.sleep(wait).await;
        }
    }

    fn refill(&self, st: &mut BucketState, now: u64) {
        let elapsed = now.saturating_sub(st.last_refill_millis);
        if elapsed > 0 {
            let accrued = (elapsed as f64 / 1000.0) * self.rate.load();
            st.tokens = (st.tokens + accrued).min(self.burst);
            st.last_refill_millis = now;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
