//! The agent contract and the shared execution machinery every agent leans
//! on: gated provider calls and bounded parallel fan-out.

use crate::error::AgentError;
use crate::gate::{ProviderGate, ProviderGates};
use crate::provider::{Provider, ProviderClient};
use crate::repo::Repository;
use crate::task::{AgentKind, AgentTask};
use crate::time::{Clock, Deadline};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A provider client wrapped in its gate. This is the only path to the
/// outside world: every call takes a permit first and records its terminal
/// status, on all exit paths.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Provider,
    gate: Arc<ProviderGate>,
    client: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
}

impl ProviderHandle {
    pub fn new(
        provider: Provider,
        gate: Arc<ProviderGate>,
        client: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { provider, gate, client, clock }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// One gated request/response round trip.
    ///
    /// A call cut short by the caller's deadline is recorded breaker-neutral:
    /// the provider's verdict was never observed. Provider-side timeouts are
    /// the client's to report as [`AgentError::Transient`].
    pub async fn call(&self, prompt: &str, deadline: Deadline) -> Result<String, AgentError> {
        let permit = self.gate.acquire(deadline).await?;
        let budget = deadline.remaining(self.clock.as_ref());
        match tokio::time::timeout(budget, self.client.call(prompt)).await {
            Ok(Ok(response)) => {
                permit.success();
                Ok(response)
            }
            Ok(Err(err)) => {
                permit.failure(&err);
                Err(err)
            }
            Err(_) => {
                let err = AgentError::DeadlineExceeded { elapsed: budget };
                permit.failure(&err);
                Err(err)
            }
        }
    }
}

/// Shared bounded worker pool for every parallel section in the system.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self { semaphore: Arc::new(Semaphore::new(workers)), workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fan out `jobs` under a joint deadline and collect every result.
    ///
    /// Each job waits for a pool slot and then runs; the timeout covers the
    /// queue wait, so a job that never got a slot is cut off too and its
    /// provider call never starts. A timed-out job's future is dropped, which
    /// releases its slot and abandons (rather than records) any permit it
    /// held.
    pub async fn run_parallel<'a, T: Send>(
        &self,
        timeout: Duration,
        jobs: Vec<BoxFuture<'a, Result<T, AgentError>>>,
    ) -> Vec<Result<T, AgentError>> {
        let runs = jobs.into_iter().map(|job| {
            let semaphore = self.semaphore.clone();
            async move {
                match tokio::time::timeout(timeout, async move {
                    let _slot = semaphore
                        .acquire()
                        .await
                        .expect("worker pool semaphore is never closed");
                    job.await
                })
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AgentError::DeadlineExceeded { elapsed: timeout }),
                }
            }
        });
        futures::future::join_all(runs).await
    }
}

/// Everything an agent's step function gets to work with.
pub struct AgentContext {
    handles: HashMap<Provider, ProviderHandle>,
    pub repo: Arc<dyn Repository>,
    pub pool: WorkerPool,
    pub clock: Arc<dyn Clock>,
}

impl AgentContext {
    pub fn new(
        gates: &ProviderGates,
        clients: HashMap<Provider, Arc<dyn ProviderClient>>,
        repo: Arc<dyn Repository>,
        pool: WorkerPool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handles = clients
            .into_iter()
            .map(|(provider, client)| {
                let handle =
                    ProviderHandle::new(provider, gates.gate(provider).clone(), client, clock.clone());
                (provider, handle)
            })
            .collect();
        Self { handles, repo, pool, clock }
    }

    pub fn handle(&self, provider: Provider) -> Result<&ProviderHandle, AgentError> {
        self.handles
            .get(&provider)
            .ok_or_else(|| AgentError::InvalidInput(format!("no client configured for provider {provider}")))
    }

    pub fn has_client(&self, provider: Provider) -> bool {
        self.handles.contains_key(&provider)
    }

    /// First configured handle among `preferences`, if any.
    pub fn first_handle(&self, preferences: &[Provider]) -> Option<&ProviderHandle> {
        preferences.iter().find_map(|p| self.handles.get(p))
    }

    pub fn deadline_after(&self, budget: Duration) -> Deadline {
        Deadline::after(self.clock.as_ref(), budget)
    }
}

/// The contract every agent, primary or fallback, implements.
///
/// `step` is the domain logic only; admission, retry, fallback handoff, and
/// result assembly live in the dispatch layer.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// The provider this agent's primary path talks to.
    fn provider(&self) -> Provider;

    /// Rough duration estimate for upstream scheduling.
    fn estimate(&self, task: &AgentTask) -> Duration;

    /// Fail fast on malformed input.
    fn validate(&self, task: &AgentTask) -> Result<(), AgentError>;

    fn can_handle(&self, task: &AgentTask) -> bool {
        task.kind == self.kind() && self.validate(task).is_ok()
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError>;
}
