//! Convenient re-exports for the common Scrivener surface.
pub use crate::{
    agent::{Agent, AgentContext, ProviderHandle, WorkerPool},
    backoff::{Backoff, Jitter, RetrySchedule},
    breaker::{BreakerConfig, BreakerState},
    discovery::{run_discovery, DiscoveryConfig, DiscoveryOutcome, DiscoverySource, SourcePaper},
    error::{AgentError, ErrorClass},
    fallback::FallbackRegistry,
    gate::{GateStats, Permit, ProviderGate, ProviderGates},
    orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorConfig},
    provider::{Provider, ProviderClient, Quota},
    repo::{InMemoryRepository, Repository},
    retry::{RetryError, RetryRunner, RetryTimings},
    task::{AgentKind, AgentResult, AgentTask, Outcome, TaskInput},
    time::{Clock, Deadline, Sleeper, TokioClock, TokioSleeper},
};
