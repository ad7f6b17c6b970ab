//! The process-wide orchestrator: provider gates, dispatcher, agent and
//! fallback registries, and the repository handle, wired once at startup and
//! passed to agents explicitly. No hidden singletons.

use crate::agent::{Agent, AgentContext, WorkerPool};
use crate::agents::citation::{CitationFormatter, RuleBasedCitationFormatter};
use crate::agents::concepts::ConceptExplainer;
use crate::agents::discovery::RelatedPaperDiscovery;
use crate::agents::metadata::MetadataEnhancer;
use crate::agents::processor::PaperProcessor;
use crate::agents::quality::{HeuristicQualityChecker, QualityChecker};
use crate::agents::research::PerplexityResearcher;
use crate::agents::summarizer::{ContentSummarizer, ExtractiveSummarizer};
use crate::breaker::BreakerConfig;
use crate::dispatch::Dispatcher;
use crate::fallback::FallbackRegistry;
use crate::gate::{GateStats, ProviderGate, ProviderGates};
use crate::provider::{Provider, ProviderClient, Quota};
use crate::repo::{InMemoryRepository, Repository};
use crate::retry::RetryTimings;
use crate::task::{AgentKind, AgentResult, AgentTask};
use crate::time::{Clock, Deadline, Sleeper, TokioClock, TokioSleeper};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-provider quota overrides; anything absent uses the documented
    /// defaults.
    pub quotas: HashMap<Provider, Quota>,
    pub breaker: BreakerConfig,
    pub retry: RetryTimings,
    /// Per-provider retry overrides.
    pub retry_overrides: HashMap<Provider, RetryTimings>,
    pub worker_pool_size: usize,
    /// Deadline budget for `run` when the caller doesn't pass one.
    pub default_task_budget_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            quotas: HashMap::new(),
            breaker: BreakerConfig::default(),
            retry: RetryTimings::default(),
            retry_overrides: HashMap::new(),
            worker_pool_size: 8,
            default_task_budget_secs: 300,
        }
    }
}

pub struct Orchestrator {
    gates: ProviderGates,
    ctx: AgentContext,
    dispatcher: Dispatcher,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    fallbacks: Arc<FallbackRegistry>,
    clock: Arc<dyn Clock>,
    default_budget: Duration,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run a task against its registered agent under the default budget.
    pub async fn run(&self, task: &AgentTask) -> AgentResult {
        self.run_with_budget(task, self.default_budget).await
    }

    pub async fn run_with_budget(&self, task: &AgentTask, budget: Duration) -> AgentResult {
        let deadline = Deadline::after(self.clock.as_ref(), budget);
        let agent = self
            .agents
            .get(&task.kind)
            .expect("an agent is registered for every kind at startup");
        self.dispatcher.execute(&self.ctx, agent.as_ref(), task, deadline).await
    }

    pub fn agent(&self, kind: AgentKind) -> &Arc<dyn Agent> {
        self.agents.get(&kind).expect("an agent is registered for every kind at startup")
    }

    pub fn estimate(&self, task: &AgentTask) -> Duration {
        self.agent(task.kind).estimate(task)
    }

    pub fn gate(&self, provider: Provider) -> &Arc<ProviderGate> {
        self.gates.gate(provider)
    }

    /// Stats for every provider, sorted by provider.
    pub fn stats(&self) -> Vec<GateStats> {
        self.gates.snapshot()
    }

    pub fn update_rate(&self, provider: Provider, permits_per_sec: f64) {
        self.gates.gate(provider).update_rate(permits_per_sec);
    }

    pub fn reset_breaker(&self, provider: Provider) {
        self.gates.gate(provider).reset_breaker();
    }

    pub fn reset_all_breakers(&self) {
        self.gates.reset_all();
    }

    pub fn fallbacks(&self) -> &FallbackRegistry {
        &self.fallbacks
    }

    /// The execution context, for callers that drive the discovery
    /// coordinator directly.
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }
}

pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    repository: Option<Arc<dyn Repository>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    agents: Vec<Arc<dyn Agent>>,
    fallbacks: Vec<Arc<dyn Agent>>,
    default_fallbacks: bool,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            clients: HashMap::new(),
            repository: None,
            clock: None,
            sleeper: None,
            agents: Vec::new(),
            fallbacks: Vec::new(),
            default_fallbacks: true,
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client(mut self, provider: Provider, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Replace the default agent for this agent's kind.
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Register (or replace) the fallback for this agent's kind.
    pub fn fallback(mut self, agent: Arc<dyn Agent>) -> Self {
        self.fallbacks.push(agent);
        self
    }

    /// Start from an empty fallback registry instead of the built-in
    /// rule-based set.
    pub fn without_default_fallbacks(mut self) -> Self {
        self.default_fallbacks = false;
        self
    }

    pub fn build(self) -> Orchestrator {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(TokioClock::default()));
        let sleeper: Arc<dyn Sleeper> = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let repository: Arc<dyn Repository> =
            self.repository.unwrap_or_else(|| Arc::new(InMemoryRepository::new()));

        let gates = ProviderGates::new(
            &self.config.quotas,
            self.config.breaker.clone(),
            clock.clone(),
            sleeper.clone(),
        );
        let ctx = AgentContext::new(
            &gates,
            self.clients,
            repository,
            WorkerPool::new(self.config.worker_pool_size),
            clock.clone(),
        );

        let mut agents: HashMap<AgentKind, Arc<dyn Agent>> = HashMap::new();
        let defaults: Vec<Arc<dyn Agent>> = vec![
            Arc::new(PaperProcessor::default()),
            Arc::new(MetadataEnhancer::default()),
            Arc::new(ContentSummarizer::default()),
            Arc::new(ConceptExplainer::default()),
            Arc::new(CitationFormatter::default()),
            Arc::new(QualityChecker::default()),
            Arc::new(PerplexityResearcher::default()),
            Arc::new(RelatedPaperDiscovery),
        ];
        for agent in defaults.into_iter().chain(self.agents) {
            agents.insert(agent.kind(), agent);
        }

        let mut registry = FallbackRegistry::new();
        if self.default_fallbacks {
            registry.register(Arc::new(RuleBasedCitationFormatter));
            registry.register(Arc::new(HeuristicQualityChecker));
            registry.register(Arc::new(ExtractiveSummarizer));
        }
        for fallback in self.fallbacks {
            registry.register(fallback);
        }
        let fallbacks = Arc::new(registry);

        let dispatcher = Dispatcher::new(
            clock.clone(),
            sleeper,
            fallbacks.clone(),
            self.config.retry.clone(),
            self.config.retry_overrides.clone(),
        );

        Orchestrator {
            gates,
            ctx,
            dispatcher,
            agents,
            fallbacks,
            clock,
            default_budget: Duration::from_secs(self.config.default_task_budget_secs),
        }
    }
}
