//! External providers and the narrow client interface the orchestrator consumes.

use crate::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An external dependency with its own quota, latency, and failure profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Perplexity,
    Ollama,
    Crossref,
    SemanticScholar,
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Perplexity,
        Provider::Ollama,
        Provider::Crossref,
        Provider::SemanticScholar,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Perplexity => "perplexity",
            Provider::Ollama => "ollama",
            Provider::Crossref => "crossref",
            Provider::SemanticScholar => "semantic_scholar",
        }
    }

    /// Documented request quota for each provider.
    ///
    /// Crossref's polite pool allows ~45 req/s; Semantic Scholar's public tier
    /// roughly 100 req / 5 min; Perplexity ~10 req/min. Ollama runs on the
    /// local host and is effectively unbounded unless the operator says
    /// otherwise.
    pub fn default_quota(&self) -> Quota {
        match self {
            Provider::OpenAi => Quota::new(3.0, 6.0),
            Provider::Anthropic => Quota::new(3.0, 6.0),
            Provider::Perplexity => Quota::new(0.17, 1.0),
            Provider::Ollama => Quota::unbounded(),
            Provider::Crossref => Quota::new(45.0, 45.0),
            Provider::SemanticScholar => Quota::new(0.3, 1.0),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Request budget for one provider: a sustained rate plus a burst allowance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Sustained permits per second.
    pub permits_per_sec: f64,
    /// Bucket capacity; how far ahead of the sustained rate a caller may run.
    pub burst: f64,
}

impl Quota {
    pub fn new(permits_per_sec: f64, burst: f64) -> Self {
        Self { permits_per_sec, burst: burst.max(1.0) }
    }

    /// A quota so large it never gates in practice (local providers).
    pub fn unbounded() -> Self {
        Self { permits_per_sec: 1e9, burst: 1e9 }
    }
}

/// The only thing the orchestrator knows about talking to a provider.
///
/// A prompt is a single request/response; streaming is a client concern.
/// Implementations must map transport failures onto [`AgentError`] variants
/// that preserve the HTTP status category, so the retry policy can classify
/// them (see [`AgentError::from_status`]).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn call(&self, prompt: &str) -> Result<String, AgentError>;
}
