//! Discovery configuration: presets, task-input resolution, validation.

use crate::error::AgentError;
use crate::task::TaskInput;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The independent discovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    CitationNetwork,
    AuthorNetwork,
    VenueNetwork,
    SemanticSimilarity,
    OpenResearch,
}

impl DiscoverySource {
    pub const ALL: [DiscoverySource; 5] = [
        DiscoverySource::CitationNetwork,
        DiscoverySource::AuthorNetwork,
        DiscoverySource::VenueNetwork,
        DiscoverySource::SemanticSimilarity,
        DiscoverySource::OpenResearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DiscoverySource::CitationNetwork => "citation_network",
            DiscoverySource::AuthorNetwork => "author_network",
            DiscoverySource::VenueNetwork => "venue_network",
            DiscoverySource::SemanticSimilarity => "semantic_similarity",
            DiscoverySource::OpenResearch => "open_research",
        }
    }
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiscoverySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiscoverySource::ALL
            .into_iter()
            .find(|src| src.name() == s.trim())
            .ok_or_else(|| format!("unknown discovery source `{s}`"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryConfig {
    pub enabled_sources: Vec<DiscoverySource>,
    pub max_papers_per_source: usize,
    pub max_total_papers: usize,
    pub min_relevance: f64,
    pub timeout_seconds: u64,
    pub parallel_execution: bool,
    pub ai_synthesis: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::comprehensive()
    }
}

impl DiscoveryConfig {
    /// Every strategy, generous caps. The default.
    pub fn comprehensive() -> Self {
        Self {
            enabled_sources: DiscoverySource::ALL.to_vec(),
            max_papers_per_source: 20,
            max_total_papers: 50,
            min_relevance: 0.3,
            timeout_seconds: 30,
            parallel_execution: true,
            ai_synthesis: true,
        }
    }

    /// Citation network plus semantic similarity under a tight deadline.
    pub fn fast() -> Self {
        Self {
            enabled_sources: vec![
                DiscoverySource::CitationNetwork,
                DiscoverySource::SemanticSimilarity,
            ],
            max_papers_per_source: 10,
            max_total_papers: 20,
            min_relevance: 0.4,
            timeout_seconds: 10,
            parallel_execution: true,
            ai_synthesis: false,
        }
    }

    /// Citation network only.
    pub fn citation() -> Self {
        Self {
            enabled_sources: vec![DiscoverySource::CitationNetwork],
            max_papers_per_source: 25,
            max_total_papers: 25,
            min_relevance: 0.3,
            timeout_seconds: 15,
            parallel_execution: true,
            ai_synthesis: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// All the ways a config goes wrong, collected rather than first-wins.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.enabled_sources.is_empty() {
            errors.push("enabledSources must not be empty".to_string());
        }
        if self.max_papers_per_source == 0 {
            errors.push("maxPapersPerSource must be positive".to_string());
        }
        if self.max_total_papers == 0 {
            errors.push("maxTotalPapers must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            errors.push(format!("minRelevance {} outside [0, 1]", self.min_relevance));
        }
        if self.timeout_seconds == 0 {
            errors.push("timeoutSeconds must be positive".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Resolve the effective config for a task: preset (`configurationType`),
    /// then a nested `configuration` object, then flat overrides. Unknown
    /// keys are ignored throughout.
    pub fn from_input(input: &TaskInput) -> Result<Self, AgentError> {
        let mut config = match input.opt_str("configurationType") {
            None => Self::default(),
            Some("comprehensive") => Self::comprehensive(),
            Some("fast") => Self::fast(),
            Some("citation") => Self::citation(),
            Some(other) => {
                return Err(AgentError::InvalidInput(format!(
                    "unknown configurationType `{other}`"
                )))
            }
        };

        if let Some(node) = input.get("configuration") {
            let patch: ConfigPatch = serde_json::from_value(node.clone())
                .map_err(|e| AgentError::InvalidInput(format!("bad configuration object: {e}")))?;
            patch.apply(&mut config);
        }

        // Flat overrides, as sent by callers that don't build a nested object.
        if let Some(n) = input.opt_u64("maxTotalPapers") {
            config.max_total_papers = n as usize;
        }
        if let Some(n) = input.opt_u64("maxPapersPerSource") {
            config.max_papers_per_source = n as usize;
        }
        if let Some(f) = input.opt_f64("minimumRelevanceScore") {
            config.min_relevance = f;
        }
        if let Some(n) = input.opt_u64("timeoutSeconds") {
            config.timeout_seconds = n;
        }
        if let Some(b) = input.opt_bool("parallelExecution") {
            config.parallel_execution = b;
        }
        if let Some(b) = input.opt_bool("enableAISynthesis") {
            config.ai_synthesis = b;
        }
        Ok(config)
    }
}

/// Partial config for the nested `configuration` object; only present fields
/// override the preset.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigPatch {
    enabled_sources: Option<Vec<DiscoverySource>>,
    max_papers_per_source: Option<usize>,
    max_total_papers: Option<usize>,
    min_relevance: Option<f64>,
    timeout_seconds: Option<u64>,
    parallel_execution: Option<bool>,
    ai_synthesis: Option<bool>,
}

impl ConfigPatch {
    fn apply(self, config: &mut DiscoveryConfig) {
        if let Some(v) = self.enabled_sources {
            config.enabled_sources = v;
        }
        if let Some(v) = self.max_papers_per_source {
            config.max_papers_per_source = v;
        }
        if let Some(v) = self.max_total_papers {
            config.max_total_papers = v;
        }
        if let Some(v) = self.min_relevance {
            config.min_relevance = v;
        }
        if let Some(v) = self.timeout_seconds {
            config.timeout_seconds = v;
        }
        if let Some(v) = self.parallel_execution {
            config.parallel_execution = v;
        }
        if let Some(v) = self.ai_synthesis {
            config.ai_synthesis = v;
        }
    }
}
