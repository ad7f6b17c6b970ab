//! Concept explanation: pull the load-bearing terms out of a paper and
//! explain them at the requested level.

use crate::agent::{Agent, AgentContext};
use crate::agents::json_payload;
use crate::error::AgentError;
use crate::provider::Provider;
use crate::task::{AgentKind, AgentTask};
use crate::time::Deadline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationLevel {
    Basic,
    Standard,
    Detailed,
}

impl ExplanationLevel {
    fn audience(&self) -> &'static str {
        match self {
            ExplanationLevel::Basic => "a curious high-school student",
            ExplanationLevel::Standard => "a graduate student outside the field",
            ExplanationLevel::Detailed => "a researcher in an adjacent field",
        }
    }
}

impl FromStr for ExplanationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ExplanationLevel::Basic),
            "standard" => Ok(ExplanationLevel::Standard),
            "detailed" => Ok(ExplanationLevel::Detailed),
            other => Err(format!("unknown explanation level `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptExplanation {
    pub concept: String,
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
struct WireConcept {
    #[serde(alias = "term", alias = "name")]
    concept: Option<String>,
    #[serde(alias = "definition")]
    explanation: Option<String>,
}

fn explain_prompt(level: ExplanationLevel, content: &str) -> String {
    format!(
        "Identify the key technical concepts in this paper and explain each for {}. \
         Return a JSON array of {{\"concept\": .., \"explanation\": ..}}.\n\n{content}",
        level.audience()
    )
}

/// Parse the concept list; a response that is not a JSON array degrades to a
/// single explanation blob rather than failing the task.
fn parse_concepts(response: &str) -> Vec<ConceptExplanation> {
    let parsed = json_payload(response)
        .and_then(|payload| serde_json::from_str::<Vec<WireConcept>>(payload).ok());
    match parsed {
        Some(wires) => wires
            .into_iter()
            .filter_map(|w| {
                let concept = w.concept?;
                Some(ConceptExplanation { concept, explanation: w.explanation.unwrap_or_default() })
            })
            .collect(),
        None => {
            tracing::warn!("concept response not a JSON array, keeping it as one explanation");
            vec![ConceptExplanation {
                concept: "overview".to_string(),
                explanation: response.trim().to_string(),
            }]
        }
    }
}

pub struct ConceptExplainer {
    provider: Provider,
}

impl ConceptExplainer {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for ConceptExplainer {
    fn default() -> Self {
        Self::new(Provider::Anthropic)
    }
}

#[async_trait]
impl Agent for ConceptExplainer {
    fn kind(&self) -> AgentKind {
        AgentKind::ConceptExplainer
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let len = task.input.opt_str("content").map_or(15_000, str::len);
        Duration::from_millis(4_000 + (len as u64 / 1_000) * 80)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("paperId")?;
        task.input.require_str("content")?;
        task.input.opt_enum::<ExplanationLevel>("explanationLevel").map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper_id = task.input.require_str("paperId")?.to_string();
        let content = task.input.require_str("content")?;
        let level = task
            .input
            .opt_enum::<ExplanationLevel>("explanationLevel")?
            .unwrap_or(ExplanationLevel::Standard);

        let handle = ctx.handle(self.provider)?;
        let response = handle.call(&explain_prompt(level, content), deadline).await?;
        let concepts = parse_concepts(&response);

        Ok(json!({
            "paperId": paper_id,
            "explanationLevel": level,
            "concepts": concepts,
        }))
    }
}
