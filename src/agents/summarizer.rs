//! Content summarisation at three depths, with an extractive fallback.

use crate::agent::{Agent, AgentContext};
use crate::agents::citation::scan_headings;
use crate::agents::split_sentences;
use crate::error::AgentError;
use crate::provider::Provider;
use crate::repo::{best_effort, Summary};
use crate::task::{AgentKind, AgentTask};
use crate::time::Deadline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryDepth {
    Brief,
    Standard,
    Detailed,
}

impl SummaryDepth {
    pub fn name(&self) -> &'static str {
        match self {
            SummaryDepth::Brief => "brief",
            SummaryDepth::Standard => "standard",
            SummaryDepth::Detailed => "detailed",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            SummaryDepth::Brief => "Summarise this paper in 2-3 sentences.",
            SummaryDepth::Standard => {
                "Summarise this paper in one paragraph covering question, approach, and findings."
            }
            SummaryDepth::Detailed => {
                "Summarise this paper in detail: motivation, methodology, results, and limitations, one short paragraph each."
            }
        }
    }
}

impl FromStr for SummaryDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brief" => Ok(SummaryDepth::Brief),
            "standard" => Ok(SummaryDepth::Standard),
            "detailed" => Ok(SummaryDepth::Detailed),
            other => Err(format!("unknown summary type `{other}`")),
        }
    }
}

fn summary_row(paper_id: &str, depth: SummaryDepth, content: &str) -> Summary {
    Summary {
        paper_id: paper_id.to_string(),
        summary_type: depth.name().to_string(),
        content: content.to_string(),
    }
}

fn result_data(paper_id: &str, depth: SummaryDepth, summary: &str) -> Value {
    json!({
        "paperId": paper_id,
        "summaryType": depth,
        "summary": summary,
        "wordCount": summary.split_whitespace().count(),
    })
}

pub struct ContentSummarizer {
    provider: Provider,
}

impl ContentSummarizer {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for ContentSummarizer {
    fn default() -> Self {
        Self::new(Provider::Anthropic)
    }
}

#[async_trait]
impl Agent for ContentSummarizer {
    fn kind(&self) -> AgentKind {
        AgentKind::ContentSummarizer
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let len = task.input.opt_str("textContent").map_or(20_000, str::len);
        Duration::from_millis(4_000 + (len as u64 / 1_000) * 80)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("paperId")?;
        task.input.require_str("textContent")?;
        task.input.opt_enum::<SummaryDepth>("summaryType").map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper_id = task.input.require_str("paperId")?.to_string();
        let content = task.input.require_str("textContent")?;
        let depth =
            task.input.opt_enum::<SummaryDepth>("summaryType")?.unwrap_or(SummaryDepth::Standard);

        let handle = ctx.handle(self.provider)?;
        let prompt = format!("{}\n\n{content}", depth.instruction());
        let summary = handle.call(&prompt, deadline).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(AgentError::Parse("provider returned an empty summary".into()));
        }

        let row = summary_row(&paper_id, depth, &summary);
        best_effort("summaries", ctx.repo.summaries().replace_for_paper(&paper_id, vec![row]))
            .await;

        Ok(result_data(&paper_id, depth, &summary))
    }
}

/// Extractive fallback: lead sentences, weighted toward the front of each
/// section. No provider involved.
#[derive(Debug, Default)]
pub struct ExtractiveSummarizer;

fn sentence_budget(depth: SummaryDepth) -> usize {
    match depth {
        SummaryDepth::Brief => 3,
        SummaryDepth::Standard => 6,
        SummaryDepth::Detailed => 12,
    }
}

/// Lead sentences per section, falling back to document-leading sentences
/// when there are no headings.
pub fn extractive_summary(content: &str, depth: SummaryDepth) -> String {
    let budget = sentence_budget(depth);
    let headings = scan_headings(content);

    let mut picked: Vec<&str> = Vec::new();
    if headings.is_empty() {
        picked.extend(split_sentences(content).into_iter().take(budget));
    } else {
        let mut bounds: Vec<usize> = headings.iter().map(|&(offset, _)| offset).collect();
        bounds.push(content.len());
        let per_section = (budget / headings.len().max(1)).max(1);
        for window in bounds.windows(2) {
            let section = &content[window[0]..window[1]];
            // First line is the heading itself.
            let body = section.split_once('\n').map(|(_, body)| body).unwrap_or("");
            picked.extend(split_sentences(body).into_iter().take(per_section));
            if picked.len() >= budget {
                break;
            }
        }
        picked.truncate(budget);
    }
    picked.join(" ")
}

#[async_trait]
impl Agent for ExtractiveSummarizer {
    fn kind(&self) -> AgentKind {
        AgentKind::ContentSummarizer
    }

    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn estimate(&self, _task: &AgentTask) -> Duration {
        Duration::from_millis(150)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("paperId")?;
        task.input.require_str("textContent").map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        _deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper_id = task.input.require_str("paperId")?.to_string();
        let content = task.input.require_str("textContent")?;
        let depth =
            task.input.opt_enum::<SummaryDepth>("summaryType")?.unwrap_or(SummaryDepth::Standard);

        let summary = extractive_summary(content, depth);
        if summary.is_empty() {
            return Err(AgentError::InvalidInput("textContent has no sentences to extract".into()));
        }

        let row = summary_row(&paper_id, depth, &summary);
        best_effort("summaries", ctx.repo.summaries().replace_for_paper(&paper_id, vec![row]))
            .await;

        Ok(result_data(&paper_id, depth, &summary))
    }
}
