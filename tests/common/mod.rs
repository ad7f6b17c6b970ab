//! Shared fixtures: programmable provider clients and orchestrator builders.

#![allow(dead_code)]

use async_trait::async_trait;
use scrivener::error::AgentError;
use scrivener::provider::{Provider, ProviderClient, Quota};
use scrivener::{Orchestrator, OrchestratorBuilder, OrchestratorConfig};
use scrivener::backoff::{Backoff, Jitter, RetrySchedule};
use scrivener::retry::RetryTimings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Route tracing output into the test harness, so `--nocapture` runs show
/// breaker transitions, retries, and fallback engagement per test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Provider client driven by a closure over the prompt.
pub struct FnClient {
    respond: Box<dyn Fn(&str) -> Result<String, AgentError> + Send + Sync>,
    calls: AtomicUsize,
}

impl FnClient {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<String, AgentError> + Send + Sync + 'static,
    {
        Arc::new(Self { respond: Box::new(respond), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for FnClient {
    async fn call(&self, prompt: &str) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt)
    }
}

/// Client that waits (tokio time) before answering.
pub struct SlowClient {
    pub delay: Duration,
    pub reply: String,
}

#[async_trait]
impl ProviderClient for SlowClient {
    async fn call(&self, _prompt: &str) -> Result<String, AgentError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

pub fn ok_client(reply: &str) -> Arc<FnClient> {
    let reply = reply.to_string();
    FnClient::new(move |_| Ok(reply.clone()))
}

pub fn failing_client(err: AgentError) -> Arc<FnClient> {
    FnClient::new(move |_| Err(err.clone()))
}

pub fn transient(provider: Provider) -> AgentError {
    AgentError::Transient { provider, message: "upstream 502".into() }
}

/// Quotas that never gate, for tests that aren't about rate limiting.
pub fn generous_quotas() -> HashMap<Provider, Quota> {
    Provider::ALL.into_iter().map(|p| (p, Quota::new(10_000.0, 10_000.0))).collect()
}

/// Retry schedules measured in single milliseconds, so retries don't slow
/// the suite down.
pub fn quick_retry() -> RetryTimings {
    RetryTimings {
        transient: RetrySchedule::new(3, Backoff::constant(Duration::from_millis(1)), Jitter::None),
        rate_limited: RetrySchedule::new(
            5,
            Backoff::constant(Duration::from_millis(1)),
            Jitter::None,
        ),
        breaker_probe_attempts: 2,
    }
}

/// Builder preloaded with generous quotas and quick retries.
pub fn test_orchestrator() -> OrchestratorBuilder {
    init_tracing();
    let config = OrchestratorConfig {
        quotas: generous_quotas(),
        retry: quick_retry(),
        ..OrchestratorConfig::default()
    };
    Orchestrator::builder().config(config)
}
