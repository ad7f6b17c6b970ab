//! Registry mapping each agent kind to at most one local fallback agent.
//!
//! Populated at startup, read-only afterwards, so lookups take no lock.

use crate::agent::Agent;
use crate::task::AgentKind;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct FallbackRegistry {
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` as the fallback for its own kind, replacing any
    /// previous registration. Only callable while the registry is still
    /// exclusively owned, i.e. before startup finishes.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn get(&self, kind: AgentKind) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&kind)
    }

    pub fn has(&self, kind: AgentKind) -> bool {
        self.agents.contains_key(&kind)
    }

    /// Kinds with a registered fallback, sorted.
    pub fn available(&self) -> Vec<AgentKind> {
        let mut kinds: Vec<AgentKind> = self.agents.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
