//! Related-paper discovery agent: a thin wrapper that extracts the source
//! paper and configuration from the task, delegates to the discovery
//! coordinator, and persists new discoveries without duplicating known pairs.

use crate::agent::{Agent, AgentContext};
use crate::discovery::{self, candidate, DiscoveryConfig, SourcePaper};
use crate::error::AgentError;
use crate::provider::Provider;
use crate::repo::{best_effort, DiscoveredPaper, PaperRelationship};
use crate::task::{AgentKind, AgentTask, TaskInput};
use crate::time::Deadline;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

fn source_paper_from_input(input: &TaskInput) -> Result<SourcePaper, AgentError> {
    let nested = input.get("paper").cloned().map(TaskInput::from);
    let field = |key: &str| -> Option<String> {
        nested
            .as_ref()
            .and_then(|n| n.opt_str(key))
            .or_else(|| input.opt_str(key))
            .map(str::to_string)
    };

    let id = nested
        .as_ref()
        .and_then(|n| n.opt_str("id"))
        .map(str::to_string)
        .or_else(|| input.opt_str("paperId").map(str::to_string))
        .ok_or_else(|| {
            AgentError::InvalidInput("missing required field (one of `paperId`, `paper.id`)".into())
        })?;

    let authors = {
        let from_nested = nested.as_ref().map(|n| n.str_list("authors")).unwrap_or_default();
        if from_nested.is_empty() {
            input.str_list("authors")
        } else {
            from_nested
        }
    };

    Ok(SourcePaper {
        id,
        title: field("title").unwrap_or_default(),
        authors,
        doi: field("doi"),
        venue: field("venue"),
        year: nested
            .as_ref()
            .and_then(|n| n.opt_u64("year"))
            .or_else(|| input.opt_u64("year"))
            .map(|y| y as i32),
        abstract_text: field("abstract"),
    })
}

/// Stable identity for a discovered paper: DOI when known, normalised title
/// otherwise. Matches the dedup key the coordinator uses.
fn discovered_key(paper: &discovery::Candidate) -> String {
    candidate::dedup_key(paper)
}

pub struct RelatedPaperDiscovery;

#[async_trait]
impl Agent for RelatedPaperDiscovery {
    fn kind(&self) -> AgentKind {
        AgentKind::RelatedPaperDiscovery
    }

    fn provider(&self) -> Provider {
        Provider::Crossref
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        DiscoveryConfig::from_input(&task.input)
            .map(|cfg| cfg.timeout())
            .unwrap_or(Duration::from_secs(30))
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        source_paper_from_input(&task.input)?;
        DiscoveryConfig::from_input(&task.input).map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        _deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let paper = source_paper_from_input(&task.input)?;
        let cfg = DiscoveryConfig::from_input(&task.input)?;

        let outcome = discovery::run_discovery(ctx, &paper, &cfg).await?;

        // Dedup against pairs persisted by earlier runs.
        let known: HashSet<String> = ctx
            .repo
            .paper_relationships()
            .find_by_paper(&paper.id)
            .await
            .map(|rows| rows.into_iter().map(|r| r.discovered_key).collect())
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "could not load existing relationships, persisting all");
                HashSet::new()
            });

        let mut discovered_rows = Vec::new();
        let mut relationship_rows = Vec::new();
        for found in &outcome.papers {
            let key = discovered_key(found);
            if known.contains(&key) {
                continue;
            }
            discovered_rows.push(DiscoveredPaper {
                paper_id: paper.id.clone(),
                title: found.title.clone(),
                authors: found.authors.clone(),
                venue: found.venue.clone(),
                year: found.year,
                doi: found.doi.clone(),
                url: found.url.clone(),
                citation_count: found.citation_count,
                source: found.source.name().to_string(),
                relevance: found.relevance,
            });
            relationship_rows.push(PaperRelationship {
                paper_id: paper.id.clone(),
                discovered_key: key,
                relationship: found.relationship.name().to_string(),
                relevance: found.relevance,
                origin: found.source.name().to_string(),
            });
        }

        let newly_persisted = discovered_rows.len();
        if !discovered_rows.is_empty() {
            best_effort(
                "discovered_papers",
                ctx.repo.discovered_papers().save_all(discovered_rows),
            )
            .await;
            best_effort(
                "paper_relationships",
                ctx.repo.paper_relationships().save_all(relationship_rows),
            )
            .await;
        }

        Ok(json!({
            "paperId": paper.id,
            "papers": outcome.papers,
            "sourcesSucceeded": outcome.sources_succeeded,
            "sourcesFailed": outcome.sources_failed,
            "newlyPersisted": newly_persisted,
            "synthesis": outcome.synthesis,
        }))
    }
}
