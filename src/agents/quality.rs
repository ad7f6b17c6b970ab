//! Quality checking: independent AI sub-checks fanned out in parallel, a
//! weighted overall score, and a metrics-only heuristic fallback.

use crate::agent::{Agent, AgentContext};
use crate::agents::citation::scan_headings;
use crate::agents::{json_payload, split_sentences};
use crate::error::{AgentError, ErrorClass};
use crate::provider::Provider;
use crate::repo::SectionLabel;
use crate::task::{AgentKind, AgentTask};
use crate::time::Deadline;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;

/// The five independent quality dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Accuracy,
    Consistency,
    Bias,
    Hallucination,
    Coherence,
}

impl CheckKind {
    pub const ALL: [CheckKind; 5] = [
        CheckKind::Accuracy,
        CheckKind::Consistency,
        CheckKind::Bias,
        CheckKind::Hallucination,
        CheckKind::Coherence,
    ];

    /// Relative weight in the overall score; the full set sums to 1.
    pub fn weight(&self) -> f64 {
        match self {
            CheckKind::Accuracy => 0.30,
            CheckKind::Consistency => 0.20,
            CheckKind::Hallucination => 0.20,
            CheckKind::Bias => 0.15,
            CheckKind::Coherence => 0.15,
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            CheckKind::Accuracy => "Check the text for factual accuracy against its own cited sources and stated data.",
            CheckKind::Consistency => "Check the text for internal consistency: contradictions, mismatched numbers, shifting claims.",
            CheckKind::Bias => "Check the text for biased framing, loaded language, or one-sided presentation.",
            CheckKind::Hallucination => "Check the text for fabricated citations, invented entities, or unsupported specifics.",
            CheckKind::Coherence => "Check the text for logical coherence: do conclusions follow from the presented evidence?",
        }
    }
}

/// How deep a quality pass goes; deeper passes run more sub-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckDepth {
    Basic,
    Standard,
    Detailed,
    Comprehensive,
}

impl CheckDepth {
    pub fn checks(&self) -> &'static [CheckKind] {
        match self {
            CheckDepth::Basic => &[CheckKind::Consistency, CheckKind::Coherence],
            CheckDepth::Standard => {
                &[CheckKind::Accuracy, CheckKind::Consistency, CheckKind::Coherence]
            }
            CheckDepth::Detailed => &[
                CheckKind::Accuracy,
                CheckKind::Consistency,
                CheckKind::Hallucination,
                CheckKind::Coherence,
            ],
            CheckDepth::Comprehensive => &CheckKind::ALL,
        }
    }
}

impl FromStr for CheckDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(CheckDepth::Basic),
            "standard" => Ok(CheckDepth::Standard),
            "detailed" => Ok(CheckDepth::Detailed),
            "comprehensive" => Ok(CheckDepth::Comprehensive),
            other => Err(format!("unknown check type `{other}`")),
        }
    }
}

/// One sub-check's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub check: CheckKind,
    pub score: f64,
    pub issues: Vec<String>,
    pub summary: String,
}

/// Letter grade for an overall score.
pub fn grade(score: f64) -> char {
    match score {
        s if s >= 0.9 => 'A',
        s if s >= 0.8 => 'B',
        s if s >= 0.7 => 'C',
        s if s >= 0.6 => 'D',
        _ => 'F',
    }
}

/// Weighted mean of the run sub-checks, weights renormalised over the checks
/// that actually ran.
pub fn overall_score(outcomes: &[CheckOutcome]) -> f64 {
    let total_weight: f64 = outcomes.iter().map(|o| o.check.weight()).sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    let weighted: f64 = outcomes.iter().map(|o| o.score * o.check.weight()).sum();
    (weighted / total_weight).clamp(0.0, 1.0)
}

#[derive(Debug, Deserialize)]
struct WireCheck {
    score: Option<f64>,
    #[serde(default)]
    issues: Vec<String>,
    summary: Option<String>,
}

fn check_prompt(check: CheckKind, content: &str) -> String {
    format!(
        "{} Return JSON: {{\"score\": 0..1, \"issues\": [..], \"summary\": \"..\"}}.\n\n{content}",
        check.instruction()
    )
}

/// A malformed verdict degrades to a neutral outcome instead of failing the
/// whole pass.
fn parse_check_response(check: CheckKind, response: &str) -> CheckOutcome {
    let parsed = json_payload(response).and_then(|p| serde_json::from_str::<WireCheck>(p).ok());
    match parsed {
        Some(wire) => CheckOutcome {
            check,
            score: wire.score.unwrap_or(0.5).clamp(0.0, 1.0),
            issues: wire.issues,
            summary: wire.summary.unwrap_or_default(),
        },
        None => {
            tracing::warn!(check = ?check, "unparseable check verdict, scoring neutral");
            CheckOutcome {
                check,
                score: 0.5,
                issues: vec!["verdict response was unparseable".to_string()],
                summary: String::new(),
            }
        }
    }
}

fn result_data(item_id: &str, depth: CheckDepth, outcomes: &[CheckOutcome]) -> Value {
    let overall = overall_score(outcomes);
    json!({
        "itemId": item_id,
        "checkType": depth,
        "checks": outcomes,
        "overallScore": overall,
        "grade": grade(overall).to_string(),
    })
}

pub struct QualityChecker {
    provider: Provider,
}

impl QualityChecker {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for QualityChecker {
    fn default() -> Self {
        Self::new(Provider::Anthropic)
    }
}

#[async_trait]
impl Agent for QualityChecker {
    fn kind(&self) -> AgentKind {
        AgentKind::QualityChecker
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let len = task.input.opt_str("content").map_or(10_000, str::len);
        Duration::from_millis(3_000 + (len as u64 / 1_000) * 100)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("itemId")?;
        task.input.require_str("content")?;
        task.input
            .opt_enum::<CheckDepth>("checkType")
            .map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let item_id = task.input.require_str("itemId")?.to_string();
        let content = task.input.require_str("content")?.to_string();
        let depth = task.input.opt_enum::<CheckDepth>("checkType")?.unwrap_or(CheckDepth::Standard);
        let checks = depth.checks();

        let handle = ctx.handle(self.provider)?;
        let jobs: Vec<BoxFuture<'_, Result<CheckOutcome, AgentError>>> = checks
            .iter()
            .map(|&check| {
                let handle = handle.clone();
                let content = content.clone();
                Box::pin(async move {
                    let response = handle.call(&check_prompt(check, &content), deadline).await?;
                    Ok(parse_check_response(check, &response))
                }) as BoxFuture<'_, _>
            })
            .collect();

        let results = ctx
            .pool
            .run_parallel(deadline.remaining(ctx.clock.as_ref()), jobs)
            .await;

        let mut outcomes = Vec::with_capacity(checks.len());
        for (&check, outcome) in checks.iter().zip(results) {
            match outcome {
                Ok(o) => outcomes.push(o),
                Err(err) if err.class() == ErrorClass::NonRetryable => {
                    outcomes.push(parse_check_response(check, ""));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(result_data(&item_id, depth, &outcomes))
    }
}

// ---------------------------------------------------------------------------
// Heuristic fallback
// ---------------------------------------------------------------------------

/// Rule-based quality estimate from simple text metrics: sentence length,
/// section presence, and lexical diversity. No provider involved.
#[derive(Debug, Default)]
pub struct HeuristicQualityChecker;

fn sentence_length_outcome(content: &str) -> CheckOutcome {
    let sentences = split_sentences(content);
    let words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();
    let mean = if sentences.is_empty() { 0.0 } else { words as f64 / sentences.len() as f64 };
    // Readable academic prose sits around 15-30 words per sentence.
    let score = if (10.0..=30.0).contains(&mean) {
        0.9
    } else if (5.0..=40.0).contains(&mean) {
        0.7
    } else {
        0.4
    };
    CheckOutcome {
        check: CheckKind::Coherence,
        score,
        issues: if score < 0.7 {
            vec![format!("mean sentence length {mean:.1} words is outside the readable range")]
        } else {
            Vec::new()
        },
        summary: format!("{} sentences, mean {mean:.1} words", sentences.len()),
    }
}

fn section_presence_outcome(content: &str) -> CheckOutcome {
    let labels: Vec<SectionLabel> = scan_headings(content).into_iter().map(|(_, l)| l).collect();
    let expected = [SectionLabel::Introduction, SectionLabel::Methods, SectionLabel::References];
    let present = expected.iter().filter(|l| labels.contains(l)).count();
    let score = present as f64 / expected.len() as f64;
    let missing: Vec<String> = expected
        .iter()
        .filter(|l| !labels.contains(l))
        .map(|l| format!("missing `{l}` section"))
        .collect();
    CheckOutcome {
        check: CheckKind::Consistency,
        score,
        issues: missing,
        summary: format!("{present}/{} expected sections present", expected.len()),
    }
}

fn lexical_diversity_outcome(content: &str) -> CheckOutcome {
    let words: Vec<String> = content
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 2)
        .collect();
    let distinct: std::collections::HashSet<&String> = words.iter().collect();
    let ratio = if words.is_empty() { 0.0 } else { distinct.len() as f64 / words.len() as f64 };
    // Very low diversity suggests boilerplate or repetition.
    let score = (ratio * 2.0).clamp(0.2, 0.9);
    CheckOutcome {
        check: CheckKind::Accuracy,
        score,
        issues: if ratio < 0.2 { vec!["highly repetitive vocabulary".to_string()] } else { Vec::new() },
        summary: format!("{} distinct / {} words", distinct.len(), words.len()),
    }
}

#[async_trait]
impl Agent for HeuristicQualityChecker {
    fn kind(&self) -> AgentKind {
        AgentKind::QualityChecker
    }

    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn estimate(&self, _task: &AgentTask) -> Duration {
        Duration::from_millis(100)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("itemId")?;
        task.input.require_str("content").map(|_| ())
    }

    async fn step(
        &self,
        _ctx: &AgentContext,
        task: &AgentTask,
        _deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let item_id = task.input.require_str("itemId")?.to_string();
        let content = task.input.require_str("content")?;
        let depth = task.input.opt_enum::<CheckDepth>("checkType")?.unwrap_or(CheckDepth::Basic);

        let outcomes = vec![
            sentence_length_outcome(content),
            section_presence_outcome(content),
            lexical_diversity_outcome(content),
        ];
        Ok(result_data(&item_id, depth, &outcomes))
    }
}
