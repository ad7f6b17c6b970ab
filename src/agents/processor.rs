//! Paper processing: structure raw text into sections, optionally enrich
//! with an AI extraction pass, and persist the structured content.

use crate::agent::{Agent, AgentContext};
use crate::agents::citation::scan_headings;
use crate::agents::json_payload;
use crate::error::AgentError;
use crate::provider::Provider;
use crate::repo::{best_effort, PaperContent, PaperSection, SectionLabel};
use crate::task::{AgentKind, AgentTask};
use crate::time::Deadline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Basic,
    Standard,
    Detailed,
    Full,
}

impl ProcessingMode {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingMode::Basic => "basic",
            ProcessingMode::Standard => "standard",
            ProcessingMode::Detailed => "detailed",
            ProcessingMode::Full => "full",
        }
    }

    fn uses_ai(&self) -> bool {
        !matches!(self, ProcessingMode::Basic)
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ProcessingMode::Basic),
            "standard" => Ok(ProcessingMode::Standard),
            "detailed" => Ok(ProcessingMode::Detailed),
            "full" => Ok(ProcessingMode::Full),
            other => Err(format!("unknown processing mode `{other}`")),
        }
    }
}

/// Cut the document into sections at its headings. Text before the first
/// heading becomes an unlabelled leading section.
pub fn split_sections(paper_id: &str, content: &str) -> Vec<PaperSection> {
    let headings = scan_headings(content);
    let mut sections = Vec::new();

    let first_heading = headings.first().map_or(content.len(), |&(offset, _)| offset);
    let preamble = content[..first_heading].trim();
    if !preamble.is_empty() {
        sections.push(PaperSection {
            paper_id: paper_id.to_string(),
            heading: String::new(),
            label: SectionLabel::Main,
            text: preamble.to_string(),
            position: 0,
        });
    }

    let mut bounds: Vec<(usize, SectionLabel)> = headings;
    bounds.push((content.len(), SectionLabel::Main));
    for window in bounds.windows(2) {
        let (start, label) = window[0];
        let end = window[1].0;
        let chunk = &content[start..end];
        let (heading, body) = chunk.split_once('\n').unwrap_or((chunk, ""));
        sections.push(PaperSection {
            paper_id: paper_id.to_string(),
            heading: heading.trim().to_string(),
            label,
            text: body.trim().to_string(),
            position: sections.len(),
        });
    }
    sections
}

#[derive(Debug, Default, Deserialize)]
struct WireExtraction {
    #[serde(alias = "abstract")]
    abstract_text: Option<String>,
    #[serde(default, alias = "keyFindings")]
    key_findings: Vec<String>,
}

fn extraction_prompt(mode: ProcessingMode, content: &str) -> String {
    let depth = match mode {
        ProcessingMode::Detailed | ProcessingMode::Full => "5-8",
        _ => "3-5",
    };
    format!(
        "Extract from this paper text: the abstract (verbatim if present, else a faithful \
         reconstruction) and {depth} key findings. \
         Return JSON: {{\"abstract\": .., \"keyFindings\": [..]}}.\n\n{content}"
    )
}

pub struct PaperProcessor {
    provider: Provider,
}

impl PaperProcessor {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for PaperProcessor {
    fn default() -> Self {
        Self::new(Provider::OpenAi)
    }
}

#[async_trait]
impl Agent for PaperProcessor {
    fn kind(&self) -> AgentKind {
        AgentKind::PaperProcessor
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let len = task
            .input
            .opt_str("rawContent")
            .or_else(|| task.input.opt_str("textContent"))
            .map_or(30_000, str::len);
        Duration::from_millis(2_000 + (len as u64 / 1_000) * 100)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("paperId")?;
        task.input.require_any_str(&["rawContent", "textContent"])?;
        task.input.opt_enum::<ProcessingMode>("processingMode").map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper_id = task.input.require_str("paperId")?.to_string();
        let content = task.input.require_any_str(&["rawContent", "textContent"])?.to_string();
        let mode = task
            .input
            .opt_enum::<ProcessingMode>("processingMode")?
            .unwrap_or(ProcessingMode::Standard);

        let sections = split_sections(&paper_id, &content);

        let extraction = if mode.uses_ai() {
            let handle = ctx.handle(self.provider)?;
            let response = handle.call(&extraction_prompt(mode, &content), deadline).await?;
            json_payload(&response)
                .and_then(|payload| serde_json::from_str::<WireExtraction>(payload).ok())
                .unwrap_or_else(|| {
                    tracing::warn!("unparseable extraction response, structural pass only");
                    WireExtraction::default()
                })
        } else {
            WireExtraction::default()
        };

        best_effort(
            "paper_contents",
            ctx.repo.paper_contents().replace_for_paper(
                &paper_id,
                vec![PaperContent {
                    paper_id: paper_id.clone(),
                    text: content.clone(),
                    processing_mode: mode.name().to_string(),
                }],
            ),
        )
        .await;
        best_effort(
            "paper_sections",
            ctx.repo.paper_sections().replace_for_paper(&paper_id, sections.clone()),
        )
        .await;

        Ok(json!({
            "paperId": paper_id,
            "processingMode": mode,
            "sections": sections.len(),
            "abstract": extraction.abstract_text,
            "keyFindings": extraction.key_findings,
        }))
    }
}
