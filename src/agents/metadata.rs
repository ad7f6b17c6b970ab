//! Metadata enhancement: AI-derived keywords and categories, plus DOI-based
//! verification against the bibliographic API.

use crate::agent::{Agent, AgentContext};
use crate::agents::{json_payload, slugify};
use crate::discovery::candidate::normalize_title;
use crate::discovery::sources::parse_crossref;
use crate::error::AgentError;
use crate::provider::Provider;
use crate::repo::{best_effort, MetadataVerification, PaperTag, Tag};
use crate::task::{AgentKind, AgentTask};
use crate::time::Deadline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementType {
    Keywords,
    Categories,
    SummaryTags,
    Full,
}

impl EnhancementType {
    fn wants_keywords(&self) -> bool {
        matches!(self, EnhancementType::Keywords | EnhancementType::SummaryTags | EnhancementType::Full)
    }

    fn wants_categories(&self) -> bool {
        matches!(self, EnhancementType::Categories | EnhancementType::Full)
    }
}

impl FromStr for EnhancementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keywords" => Ok(EnhancementType::Keywords),
            "categories" => Ok(EnhancementType::Categories),
            "summary_tags" => Ok(EnhancementType::SummaryTags),
            "full" => Ok(EnhancementType::Full),
            other => Err(format!("unknown enhancement type `{other}`")),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireEnhancement {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
}

fn enhance_prompt(enhancement: EnhancementType, title: &str, authors: &[String]) -> String {
    let mut wanted = Vec::new();
    if enhancement.wants_keywords() {
        wanted.push("\"keywords\": [5-10 terms]");
    }
    if enhancement.wants_categories() {
        wanted.push("\"categories\": [1-3 subject areas]");
    }
    format!(
        "For the paper titled \"{title}\"{}, return JSON with {}.",
        if authors.is_empty() {
            String::new()
        } else {
            format!(" by {}", authors.join(", "))
        },
        wanted.join(" and ")
    )
}

/// Malformed enhancement responses degrade to empty lists.
fn parse_enhancement(response: &str) -> WireEnhancement {
    json_payload(response)
        .and_then(|payload| serde_json::from_str(payload).ok())
        .unwrap_or_else(|| {
            tracing::warn!("unparseable enhancement response, keeping no terms");
            WireEnhancement::default()
        })
}

pub struct MetadataEnhancer {
    provider: Provider,
}

impl MetadataEnhancer {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for MetadataEnhancer {
    fn default() -> Self {
        Self::new(Provider::OpenAi)
    }
}

impl MetadataEnhancer {
    /// Look the DOI up in the bibliographic API and record whether the stored
    /// title and authors match what the registry says.
    async fn verify_against_registry(
        &self,
        ctx: &AgentContext,
        paper_id: &str,
        title: &str,
        authors: &[String],
        doi: &str,
        deadline: Deadline,
    ) -> Vec<MetadataVerification> {
        let Ok(handle) = ctx.handle(Provider::Crossref) else {
            return Vec::new();
        };
        let query = format!("works?filter=doi:{doi}&rows=1");
        let works = match handle.call(&query, deadline).await.and_then(|r| parse_crossref(&r)) {
            Ok(works) => works,
            Err(err) => {
                tracing::warn!(%err, doi, "registry verification skipped");
                return Vec::new();
            }
        };
        let Some(work) = works.first() else {
            return vec![MetadataVerification {
                paper_id: paper_id.to_string(),
                field: "doi".to_string(),
                value: doi.to_string(),
                verified: false,
                source: "crossref".to_string(),
            }];
        };

        let mut rows = vec![MetadataVerification {
            paper_id: paper_id.to_string(),
            field: "doi".to_string(),
            value: doi.to_string(),
            verified: true,
            source: "crossref".to_string(),
        }];

        if let Some(registry_title) = work.first_title() {
            rows.push(MetadataVerification {
                paper_id: paper_id.to_string(),
                field: "title".to_string(),
                value: registry_title.to_string(),
                verified: normalize_title(registry_title) == normalize_title(title),
                source: "crossref".to_string(),
            });
        }
        if !authors.is_empty() {
            let registry_authors = work.author_names();
            let known = authors.iter().any(|a| {
                registry_authors.iter().any(|r| normalize_title(r) == normalize_title(a))
            });
            rows.push(MetadataVerification {
                paper_id: paper_id.to_string(),
                field: "authors".to_string(),
                value: registry_authors.join(", "),
                verified: known,
                source: "crossref".to_string(),
            });
        }
        rows
    }
}

#[async_trait]
impl Agent for MetadataEnhancer {
    fn kind(&self) -> AgentKind {
        AgentKind::MetadataEnhancer
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let verification = if task.input.has("doi") { 2_000 } else { 0 };
        Duration::from_millis(3_000 + verification)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_str("paperId")?;
        task.input.require_str("title")?;
        task.input.opt_enum::<EnhancementType>("enhancementType").map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper_id = task.input.require_str("paperId")?.to_string();
        let title = task.input.require_str("title")?.to_string();
        let authors = task.input.str_list("authors");
        let enhancement = task
            .input
            .opt_enum::<EnhancementType>("enhancementType")?
            .unwrap_or(EnhancementType::Full);

        let handle = ctx.handle(self.provider)?;
        let response =
            handle.call(&enhance_prompt(enhancement, &title, &authors), deadline).await?;
        let enhanced = parse_enhancement(&response);

        let verifications = match task.input.opt_str("doi") {
            Some(doi) => {
                self.verify_against_registry(ctx, &paper_id, &title, &authors, doi, deadline).await
            }
            None => Vec::new(),
        };

        let mut tags = Vec::new();
        let mut links = Vec::new();
        for (term, source) in enhanced
            .keywords
            .iter()
            .map(|k| (k, "keyword"))
            .chain(enhanced.categories.iter().map(|c| (c, "category")))
        {
            let slug = slugify(term);
            if slug.is_empty() || links.iter().any(|l: &PaperTag| l.tag_slug == slug) {
                continue;
            }
            tags.push(Tag { paper_id: paper_id.clone(), slug: slug.clone(), name: term.clone() });
            links.push(PaperTag {
                paper_id: paper_id.clone(),
                tag_slug: slug,
                source: source.to_string(),
            });
        }

        best_effort("tags", ctx.repo.tags().replace_for_paper(&paper_id, tags)).await;
        best_effort(
            "paper_tags",
            ctx.repo.paper_tags().replace_for_paper(&paper_id, links),
        )
        .await;
        best_effort(
            "metadata_verifications",
            ctx.repo
                .metadata_verifications()
                .replace_for_paper(&paper_id, verifications.clone()),
        )
        .await;

        Ok(json!({
            "paperId": paper_id,
            "enhancementType": enhancement,
            "keywords": enhanced.keywords,
            "categories": enhanced.categories,
            "verifications": verifications,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhancement_type_parses_documented_names() {
        assert_eq!("summary_tags".parse::<EnhancementType>().unwrap(), EnhancementType::SummaryTags);
        assert_eq!("Full".parse::<EnhancementType>().unwrap(), EnhancementType::Full);
        assert!("everything".parse::<EnhancementType>().is_err());
    }

    #[test]
    fn keywords_and_categories_track_the_enhancement_type() {
        assert!(EnhancementType::Keywords.wants_keywords());
        assert!(!EnhancementType::Keywords.wants_categories());
        assert!(EnhancementType::Full.wants_keywords());
        assert!(EnhancementType::Full.wants_categories());
        assert!(!EnhancementType::Categories.wants_keywords());
    }

    #[test]
    fn enhancement_parses_and_degrades() {
        let good = parse_enhancement(r#"{"keywords": ["caching", "LRU"], "categories": ["systems"]}"#);
        assert_eq!(good.keywords, vec!["caching", "LRU"]);
        assert_eq!(good.categories, vec!["systems"]);

        let bad = parse_enhancement("no json at all");
        assert!(bad.keywords.is_empty());
        assert!(bad.categories.is_empty());
    }

    #[test]
    fn prompt_mentions_only_requested_outputs() {
        let kw = enhance_prompt(EnhancementType::Keywords, "T", &[]);
        assert!(kw.contains("keywords"));
        assert!(!kw.contains("categories"));

        let full = enhance_prompt(EnhancementType::Full, "T", &["A B".to_string()]);
        assert!(full.contains("keywords"));
        assert!(full.contains("categories"));
        assert!(full.contains("A B"));
    }
}
