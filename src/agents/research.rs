//! External research: extract verifiable claims from an abstract with a
//! heuristic scorer, fan one query per enabled research mode out to the web
//! research provider, and synthesise a summary.

use crate::agent::{Agent, AgentContext};
use crate::agents::split_sentences;
use crate::error::{AgentError, ErrorClass};
use crate::provider::Provider;
use crate::task::{AgentKind, AgentTask, TaskInput};
use crate::time::Deadline;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Claims below this score are not worth a research query.
pub const CLAIM_SCORE_THRESHOLD: i32 = 3;

/// At most this many claims are extracted per abstract.
pub const MAX_CLAIMS: usize = 5;

const FINDING_MARKERS: &[&str] = &[
    "we found",
    "found that",
    "we show",
    "results show",
    "results indicate",
    "demonstrate that",
    "demonstrates that",
    "we observed",
    "observed that",
    "reveal that",
    "reveals that",
    "we conclude",
    "conclude that",
];

const STATISTICAL_MARKERS: &[&str] = &[
    "p<",
    "p <",
    "p=",
    "p =",
    "p-value",
    "significant",
    "significantly",
    "confidence interval",
    "correlation",
    "standard deviation",
    "effect size",
];

const COMPARATIVE_MARKERS: &[&str] = &[
    "outperform",
    "better than",
    "worse than",
    "compared to",
    "compared with",
    "versus",
    "increase",
    "decrease",
    "improvement",
    "reduction",
    "higher than",
    "lower than",
    "leads to",
    "results in",
    "causes",
];

const CERTAINTY_MARKERS: &[&str] =
    &["clearly", "strongly", "robust", "confirms", "conclusively", "definitively", "consistent with"];

const BACKGROUND_MARKERS: &[&str] = &[
    "previous studies",
    "prior work",
    "it is known",
    "has long been",
    "in recent years",
    "the literature",
    "is widely used",
];

const METHODOLOGY_MARKERS: &[&str] = &[
    "we used",
    "we use",
    "we applied",
    "we collected",
    "we recruited",
    "was performed",
    "were performed",
    "we describe",
    "we propose",
    "data were",
    "participants were",
];

const FUTURE_WORK_MARKERS: &[&str] = &[
    "future work",
    "future research",
    "further research",
    "further work",
    "remains to be",
    "will explore",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn has_quantitative_token(sentence: &str) -> bool {
    sentence.split_whitespace().any(|w| w.contains('%') || w.chars().any(|c| c.is_ascii_digit()))
}

fn clause_count(sentence: &str) -> usize {
    1 + sentence.chars().filter(|c| matches!(c, ',' | ';' | ':')).count()
}

/// Score one sentence for how much it reads like a verifiable research
/// assertion. Findings, statistics, and quantities push it up; background,
/// methodology, future-work prose, and rambling length push it down.
pub fn score_sentence(sentence: &str) -> i32 {
    let lower = sentence.to_lowercase();
    let mut score = 0;

    if contains_any(&lower, FINDING_MARKERS) {
        score += 4;
    }
    if contains_any(&lower, STATISTICAL_MARKERS) {
        score += 3;
    }
    if has_quantitative_token(sentence) {
        score += 3;
    }
    if contains_any(&lower, COMPARATIVE_MARKERS) {
        score += 2;
    }
    if contains_any(&lower, CERTAINTY_MARKERS) {
        score += 2;
    }

    if contains_any(&lower, BACKGROUND_MARKERS) {
        score -= 2;
    }
    if contains_any(&lower, METHODOLOGY_MARKERS) {
        score -= 3;
    }
    if contains_any(&lower, FUTURE_WORK_MARKERS) {
        score -= 3;
    }
    if sentence.len() > 200 || clause_count(sentence) > 3 {
        score -= 2;
    }
    score
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claim {
    pub text: String,
    pub score: i32,
}

/// Top-scoring verifiable claims from an abstract.
pub fn extract_claims(abstract_text: &str) -> Vec<Claim> {
    let mut claims: Vec<Claim> = split_sentences(abstract_text)
        .into_iter()
        .map(|s| Claim { text: s.to_string(), score: score_sentence(s) })
        .filter(|c| c.score >= CLAIM_SCORE_THRESHOLD)
        .collect();
    claims.sort_by_key(|c| std::cmp::Reverse(c.score));
    claims.truncate(MAX_CLAIMS);
    claims
}

/// The independent research angles, each producing one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    FactVerification,
    RelatedPapers,
    TrendAnalysis,
    MethodologyReview,
    ExpertOpinion,
}

impl ResearchMode {
    fn flag(&self) -> &'static str {
        match self {
            ResearchMode::FactVerification => "verifyFacts",
            ResearchMode::RelatedPapers => "findRelated",
            ResearchMode::TrendAnalysis => "analyzeTrends",
            ResearchMode::MethodologyReview => "verifyMethodology",
            ResearchMode::ExpertOpinion => "expertOpinions",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ResearchMode::FactVerification => "fact verification",
            ResearchMode::RelatedPapers => "related papers",
            ResearchMode::TrendAnalysis => "trend analysis",
            ResearchMode::MethodologyReview => "methodology review",
            ResearchMode::ExpertOpinion => "expert opinion",
        }
    }

    const ALL: [ResearchMode; 5] = [
        ResearchMode::FactVerification,
        ResearchMode::RelatedPapers,
        ResearchMode::TrendAnalysis,
        ResearchMode::MethodologyReview,
        ResearchMode::ExpertOpinion,
    ];
}

/// Modes switched on by the task input; fact verification runs when nothing
/// is requested explicitly.
pub fn enabled_modes(input: &TaskInput) -> Vec<ResearchMode> {
    let enabled: Vec<ResearchMode> = ResearchMode::ALL
        .into_iter()
        .filter(|mode| input.opt_bool(mode.flag()).unwrap_or(false))
        .collect();
    if enabled.is_empty() {
        vec![ResearchMode::FactVerification]
    } else {
        enabled
    }
}

struct ResearchBrief {
    topic: String,
    domain: Option<String>,
    context: Option<String>,
    methodology: Option<String>,
    keywords: Vec<String>,
    claims: Vec<Claim>,
}

fn build_query(mode: ResearchMode, brief: &ResearchBrief) -> String {
    let mut query = match mode {
        ResearchMode::FactVerification => {
            if brief.claims.is_empty() {
                format!("Verify the key factual claims about: {}", brief.topic)
            } else {
                let claims: Vec<&str> = brief.claims.iter().map(|c| c.text.as_str()).collect();
                format!("Verify these research claims:\n- {}", claims.join("\n- "))
            }
        }
        ResearchMode::RelatedPapers => {
            format!("Find recent peer-reviewed papers closely related to: {}", brief.topic)
        }
        ResearchMode::TrendAnalysis => {
            format!("Summarise current research trends around: {}", brief.topic)
        }
        ResearchMode::MethodologyReview => match &brief.methodology {
            Some(m) => format!("Assess whether this methodology is sound and current: {m}"),
            None => format!("What methodologies are standard for studying: {}", brief.topic),
        },
        ResearchMode::ExpertOpinion => {
            format!("What do domain experts say about: {}", brief.topic)
        }
    };
    if let Some(domain) = &brief.domain {
        query.push_str(&format!("\nDomain: {domain}"));
    }
    if let Some(context) = &brief.context {
        query.push_str(&format!("\nContext: {context}"));
    }
    if !brief.keywords.is_empty() {
        query.push_str(&format!("\nKeywords: {}", brief.keywords.join(", ")));
    }
    query
}

fn synthesis_prompt(findings: &[(ResearchMode, String)]) -> String {
    let mut prompt =
        String::from("Synthesise these research findings into one concise summary:\n");
    for (mode, content) in findings {
        prompt.push_str(&format!("\n## {}\n{}\n", mode.label(), content));
    }
    prompt
}

pub struct PerplexityResearcher {
    provider: Provider,
}

impl PerplexityResearcher {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for PerplexityResearcher {
    fn default() -> Self {
        Self::new(Provider::Perplexity)
    }
}

#[async_trait]
impl Agent for PerplexityResearcher {
    fn kind(&self) -> AgentKind {
        AgentKind::PerplexityResearcher
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let modes = enabled_modes(&task.input).len() as u64;
        Duration::from_secs(5 + 8 * modes)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("paperId").map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper_id = task.input.require_str("paperId")?.to_string();
        let abstract_text = task.input.opt_str("abstract").unwrap_or_default();

        let claims = {
            let provided = task.input.str_list("claims");
            if provided.is_empty() {
                extract_claims(abstract_text)
            } else {
                provided.into_iter().map(|text| Claim { text, score: CLAIM_SCORE_THRESHOLD }).collect()
            }
        };

        let brief = ResearchBrief {
            topic: task
                .input
                .opt_str("topic")
                .map(str::to_string)
                .unwrap_or_else(|| format!("the paper `{paper_id}`")),
            domain: task.input.opt_str("domain").map(str::to_string),
            context: task.input.opt_str("context").map(str::to_string),
            methodology: task.input.opt_str("methodology").map(str::to_string),
            keywords: task.input.str_list("keywords"),
            claims,
        };
        let modes = enabled_modes(&task.input);

        let handle = ctx.handle(self.provider)?;
        let jobs: Vec<BoxFuture<'_, Result<String, AgentError>>> = modes
            .iter()
            .map(|&mode| {
                let handle = handle.clone();
                let query = build_query(mode, &brief);
                Box::pin(async move { handle.call(&query, deadline).await }) as BoxFuture<'_, _>
            })
            .collect();

        let results = ctx
            .pool
            .run_parallel(deadline.remaining(ctx.clock.as_ref()), jobs)
            .await;

        let mut findings: Vec<(ResearchMode, String)> = Vec::new();
        for (&mode, outcome) in modes.iter().zip(results) {
            match outcome {
                Ok(content) => findings.push((mode, content)),
                Err(err) if err.class() == ErrorClass::NonRetryable => {
                    tracing::warn!(?mode, %err, "research mode skipped");
                }
                Err(err) => return Err(err),
            }
        }

        let summary = if findings.len() > 1 {
            match handle.call(&synthesis_prompt(&findings), deadline).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(%err, "synthesis failed, concatenating findings");
                    findings.iter().map(|(_, c)| c.as_str()).collect::<Vec<_>>().join("\n\n")
                }
            }
        } else {
            findings.first().map(|(_, c)| c.clone()).unwrap_or_default()
        };

        Ok(json!({
            "paperId": paper_id,
            "claims": brief.claims,
            "modes": modes,
            "findings": findings
                .iter()
                .map(|(mode, content)| json!({"mode": mode, "content": content}))
                .collect::<Vec<Value>>(),
            "summary": summary,
        }))
    }
}
