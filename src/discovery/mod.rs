//! The discovery coordinator: run the enabled source strategies under one
//! joint deadline, merge and score whatever arrives, and rank the result.
//!
//! Partial success is success: a failed or timed-out source logs and
//! contributes nothing, and an all-empty run is "success with zero papers".
//! The deadline is an outer timeout held by the coordinator, so an adapter
//! that swallows timeouts internally still gets cut off.

pub mod candidate;
pub mod config;
pub mod sources;

pub use candidate::{Candidate, RelationshipKind, SourcePaper};
pub use config::{DiscoveryConfig, DiscoverySource};

use crate::agent::AgentContext;
use crate::error::AgentError;
use crate::provider::Provider;
use crate::time::Deadline;
use futures::future::BoxFuture;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    pub papers: Vec<Candidate>,
    pub sources_succeeded: Vec<DiscoverySource>,
    pub sources_failed: Vec<DiscoverySource>,
    pub synthesis: Option<String>,
}

pub async fn run_discovery(
    ctx: &AgentContext,
    paper: &SourcePaper,
    cfg: &DiscoveryConfig,
) -> Result<DiscoveryOutcome, AgentError> {
    if let Err(errors) = cfg.validate() {
        return Err(AgentError::InvalidInput(format!(
            "invalid discovery configuration: {}",
            errors.join("; ")
        )));
    }

    let deadline = ctx.deadline_after(cfg.timeout());
    let adapters: Vec<Box<dyn sources::SourceAdapter>> =
        cfg.enabled_sources.iter().map(|&s| sources::adapter_for(s)).collect();

    let results = if cfg.parallel_execution {
        let jobs: Vec<BoxFuture<'_, Result<Vec<Candidate>, AgentError>>> = adapters
            .iter()
            .map(|adapter| {
                Box::pin(async move { adapter.discover(ctx, paper, cfg, deadline).await })
                    as BoxFuture<'_, _>
            })
            .collect();
        ctx.pool.run_parallel(cfg.timeout(), jobs).await
    } else {
        let mut results = Vec::with_capacity(adapters.len());
        for adapter in &adapters {
            let remaining = deadline.remaining(ctx.clock.as_ref());
            if remaining.is_zero() {
                results.push(Err(AgentError::DeadlineExceeded { elapsed: cfg.timeout() }));
                continue;
            }
            let outcome =
                match tokio::time::timeout(remaining, adapter.discover(ctx, paper, cfg, deadline))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AgentError::DeadlineExceeded { elapsed: remaining }),
                };
            results.push(outcome);
        }
        results
    };

    let mut sources_succeeded = Vec::new();
    let mut sources_failed = Vec::new();
    let mut collected: Vec<Candidate> = Vec::new();
    for (adapter, outcome) in adapters.iter().zip(results) {
        match outcome {
            Ok(candidates) => {
                tracing::debug!(source = %adapter.source(), count = candidates.len(), "source finished");
                sources_succeeded.push(adapter.source());
                collected.extend(candidates);
            }
            Err(err) => {
                // Source isolation: a sick source never fails the discovery.
                tracing::warn!(source = %adapter.source(), %err, "discovery source failed");
                sources_failed.push(adapter.source());
            }
        }
    }

    let now_year = candidate::current_year();
    let scored: Vec<Candidate> = collected
        .into_iter()
        .filter(|c| !c.title.trim().is_empty())
        .filter(|c| !candidate::matches_source(c, paper))
        .map(|mut c| {
            c.relevance = candidate::relevance(&c, paper, now_year);
            c
        })
        .filter(|c| c.relevance >= cfg.min_relevance)
        .collect();

    let mut papers = candidate::dedup(scored);
    papers.sort_by(|a, b| {
        b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal)
    });
    papers.truncate(cfg.max_total_papers);

    let synthesis = if cfg.ai_synthesis && !papers.is_empty() {
        synthesize(ctx, paper, &papers, deadline).await
    } else {
        None
    };

    Ok(DiscoveryOutcome { papers, sources_succeeded, sources_failed, synthesis })
}

/// Best-effort AI synthesis of the ranked list; any failure just drops it.
async fn synthesize(
    ctx: &AgentContext,
    paper: &SourcePaper,
    papers: &[Candidate],
    deadline: Deadline,
) -> Option<String> {
    let handle =
        ctx.first_handle(&[Provider::Anthropic, Provider::OpenAi, Provider::Ollama])?;
    let titles: Vec<&str> = papers.iter().take(15).map(|c| c.title.as_str()).collect();
    let prompt = format!(
        "Given the paper \"{}\", summarise in one paragraph how these related papers connect to it:\n- {}",
        paper.title,
        titles.join("\n- ")
    );
    match handle.call(&prompt, deadline).await {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(%err, "discovery synthesis failed");
            None
        }
    }
}
