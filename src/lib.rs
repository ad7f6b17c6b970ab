#![forbid(unsafe_code)]

//! # Scrivener
//!
//! An AI-agent pipeline orchestrator for academic-paper analysis. A request
//! to process a paper fans out into independent agent tasks (parsing,
//! summarisation, citation formatting, quality checking, related-paper
//! discovery, ...), each calling external AI providers or public scholarly
//! APIs with strict, distinct rate limits and failure modes.
//!
//! The execution substrate shared by every agent:
//!
//! - **Per-provider gates**: token-bucket rate limiting, a circuit breaker,
//!   and usage counters behind one RAII-permit facade
//! - **Classified retry** with per-class exponential backoff and jitter,
//!   plus deterministic handoff to local fallback agents
//! - **One agent contract** and one parallel fan-out primitive, reused by
//!   every agent that batches work internally
//! - **A discovery coordinator** running multi-source related-paper search
//!   under a joint deadline, where partial success is success
//!
//! ## Quick start
//!
//! ```no_run
//! use scrivener::{AgentKind, AgentTask, Orchestrator, Provider};
//! use scrivener::provider::ProviderClient;
//! use scrivener::error::AgentError;
//! use std::sync::Arc;
//!
//! struct MyClient;
//!
//! #[async_trait::async_trait]
//! impl ProviderClient for MyClient {
//!     async fn call(&self, prompt: &str) -> Result<String, AgentError> {
//!         // hit the wire; map HTTP failures through AgentError::from_status
//!         # let _ = prompt;
//!         Ok("{}".to_string())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = Orchestrator::builder()
//!         .client(Provider::OpenAi, Arc::new(MyClient))
//!         .build();
//!
//!     let task = AgentTask::new(
//!         "task-1",
//!         AgentKind::CitationFormatter,
//!         serde_json::json!({
//!             "documentContent": "As shown in (Smith, 2021) ...",
//!             "citationStyles": "APA, IEEE",
//!         }),
//!     );
//!     let result = orchestrator.run(&task).await;
//!     assert!(result.is_success() || result.error.is_some());
//! }
//! ```

pub mod adaptive;
pub mod agent;
pub mod agents;
pub mod backoff;
pub mod breaker;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod limiter;
pub mod orchestrator;
pub mod provider;
pub mod repo;
pub mod retry;
pub mod task;
pub mod time;

// Re-exports
pub use agent::{Agent, AgentContext, ProviderHandle, WorkerPool};
pub use backoff::{Backoff, Jitter, RetrySchedule};
pub use breaker::{BreakerConfig, BreakerState};
pub use discovery::{DiscoveryConfig, DiscoverySource, SourcePaper};
pub use error::{AgentError, ErrorClass};
pub use fallback::FallbackRegistry;
pub use gate::{GateStats, Permit, ProviderGate, ProviderGates, UsageSnapshot};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorConfig};
pub use provider::{Provider, ProviderClient, Quota};
pub use repo::{InMemoryRepository, Repository};
pub use retry::{RetryError, RetryRunner, RetryTimings};
pub use task::{AgentKind, AgentResult, AgentTask, Outcome, TaskInput, TaskMetrics};
pub use time::{Clock, Deadline, ManualClock, Sleeper, TokioClock, TokioSleeper};

pub mod prelude;
