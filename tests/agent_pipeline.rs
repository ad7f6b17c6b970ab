//! End-to-end agent scenarios against scripted providers, including the
//! idempotent-persistence property.

mod common;

use common::{ok_client, test_orchestrator, FnClient};
use scrivener::provider::Provider;
use scrivener::repo::{InMemoryRepository, Repository};
use scrivener::task::{AgentKind, AgentTask, Outcome};
use serde_json::json;
use std::sync::Arc;

const DOC: &str = "Intro here with early results (Smith, 2021) in context.\n\
    References\n\
    [1] Smith J. Paper title. Journal X, 2021.\n";

fn structure_response() -> String {
    r#"[
        {"index": 0, "authors": ["Smith J"], "title": "Paper title", "venue": "Journal X", "year": 2021, "confidence": 0.9},
        {"index": 1, "authors": ["Smith J"], "title": "Paper title", "venue": "Journal X", "year": 2021, "confidence": 0.6}
    ]"#
    .to_string()
}

fn citation_ai() -> Arc<FnClient> {
    FnClient::new(|prompt| {
        if prompt.starts_with("Extract bibliographic") {
            Ok(structure_response())
        } else {
            Ok("Smith J. (2021). Paper title. Journal X.".to_string())
        }
    })
}

#[tokio::test]
async fn citation_extraction_end_to_end() {
    // S1: at least 2 raw citations, a structured citation with year 2021,
    // and a non-empty APA bibliography.
    let orchestrator = test_orchestrator().client(Provider::OpenAi, citation_ai()).build();
    let task = AgentTask::new(
        "cite-1",
        AgentKind::CitationFormatter,
        json!({"documentContent": DOC, "citationStyles": "APA"}),
    );

    let result = orchestrator.run(&task).await;
    assert_eq!(result.outcome, Outcome::Success);

    assert!(result.data["rawCitations"].as_u64().unwrap() >= 2);

    let structured = result.data["structuredCitations"].as_array().unwrap();
    assert!(structured.iter().any(|c| c["year"].as_i64() == Some(2021)));

    let bibliographies = result.data["bibliographies"].as_array().unwrap();
    let apa = &bibliographies[0];
    assert_eq!(apa["style"].as_str(), Some("APA"));
    assert!(!apa["entries"].as_array().unwrap().is_empty());
    assert!(apa["error"].is_null());
}

#[tokio::test]
async fn claim_extraction_research_end_to_end() {
    // S2: the statistical finding sentence scores high enough to be a claim.
    let research = ok_client("Verified: the claim matches three published replications.");
    let orchestrator = test_orchestrator().client(Provider::Perplexity, research).build();
    let task = AgentTask::new(
        "res-1",
        AgentKind::PerplexityResearcher,
        json!({
            "paperId": "p1",
            "abstract": "We found that method A significantly outperformed method B (p<0.05), with a 30% improvement.",
        }),
    );

    let result = orchestrator.run(&task).await;
    assert_eq!(result.outcome, Outcome::Success);

    let claims = result.data["claims"].as_array().unwrap();
    assert_eq!(claims.len(), 1);
    assert!(claims[0]["score"].as_i64().unwrap() >= 7);
    assert!(claims[0]["text"].as_str().unwrap().contains("method A"));

    assert!(result.data["summary"].as_str().unwrap().contains("Verified"));
}

async fn run_twice_and_snapshot<F, Fut>(
    task: AgentTask,
    orchestrator: scrivener::Orchestrator,
    snapshot: F,
) where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Vec<String>>,
{
    let first_result = orchestrator.run(&task).await;
    assert!(first_result.is_success(), "first run failed: {:?}", first_result.error);
    let first = snapshot().await;
    assert!(!first.is_empty(), "first run persisted nothing");

    let second_result = orchestrator.run(&task).await;
    assert!(second_result.is_success(), "second run failed: {:?}", second_result.error);
    let second = snapshot().await;

    assert_eq!(first, second, "rerunning the task changed persisted state");
}

#[tokio::test]
async fn citation_persistence_is_idempotent() {
    let repo = Arc::new(InMemoryRepository::new());
    let orchestrator = test_orchestrator()
        .client(Provider::OpenAi, citation_ai())
        .repository(repo.clone())
        .build();
    let task = AgentTask::new(
        "cite-2",
        AgentKind::CitationFormatter,
        json!({"paperId": "p1", "documentContent": DOC, "citationStyles": "APA"}),
    );

    let snapshot_repo = repo.clone();
    run_twice_and_snapshot(task, orchestrator, move || {
        let repo = snapshot_repo.clone();
        async move {
            repo.citations()
                .find_by_paper("p1")
                .await
                .unwrap()
                .into_iter()
                .map(|c| format!("{}|{:?}|{}", c.raw_text, c.year, c.confidence))
                .collect()
        }
    })
    .await;
}

#[tokio::test]
async fn paper_processor_persistence_is_idempotent() {
    let repo = Arc::new(InMemoryRepository::new());
    let ai = ok_client(r#"{"abstract": "We study caching.", "keyFindings": ["it works"]}"#);
    let orchestrator =
        test_orchestrator().client(Provider::OpenAi, ai).repository(repo.clone()).build();
    let task = AgentTask::new(
        "proc-1",
        AgentKind::PaperProcessor,
        json!({
            "paperId": "p2",
            "rawContent": "Title.\nIntroduction\nWe study caching.\nMethods\nWe measure.",
            "processingMode": "standard",
        }),
    );

    let snapshot_repo = repo.clone();
    run_twice_and_snapshot(task, orchestrator, move || {
        let repo = snapshot_repo.clone();
        async move {
            repo.paper_sections()
                .find_by_paper("p2")
                .await
                .unwrap()
                .into_iter()
                .map(|s| format!("{}|{}|{}", s.position, s.heading, s.text))
                .collect()
        }
    })
    .await;
}

#[tokio::test]
async fn metadata_enhancer_persistence_is_idempotent() {
    let repo = Arc::new(InMemoryRepository::new());
    let ai = ok_client(r#"{"keywords": ["caching", "latency"], "categories": ["systems"]}"#);
    let registry = ok_client(
        r#"{"status": "ok", "message": {"items": [{
            "DOI": "10.1/abc",
            "title": ["The Exact Title"],
            "author": [{"given": "Ada", "family": "Smith"}]
        }]}}"#,
    );
    let orchestrator = test_orchestrator()
        .client(Provider::OpenAi, ai)
        .client(Provider::Crossref, registry)
        .repository(repo.clone())
        .build();
    let task = AgentTask::new(
        "meta-1",
        AgentKind::MetadataEnhancer,
        json!({
            "paperId": "p3",
            "title": "The Exact Title",
            "doi": "10.1/abc",
            "authors": "Ada Smith, Bo Jones",
        }),
    );

    let snapshot_repo = repo.clone();
    run_twice_and_snapshot(task, orchestrator, move || {
        let repo = snapshot_repo.clone();
        async move {
            let mut rows: Vec<String> = repo
                .tags()
                .find_by_paper("p3")
                .await
                .unwrap()
                .into_iter()
                .map(|t| format!("tag:{}", t.slug))
                .collect();
            rows.extend(
                repo.metadata_verifications()
                    .find_by_paper("p3")
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|v| format!("verify:{}={}", v.field, v.verified)),
            );
            rows
        }
    })
    .await;
}

#[tokio::test]
async fn related_paper_discovery_persistence_is_idempotent() {
    let repo = Arc::new(InMemoryRepository::new());
    let registry = ok_client(
        r#"{"status": "ok", "message": {"items": [
            {
                "DOI": "10.2/related",
                "title": ["A Related Paper"],
                "author": [{"given": "Cy", "family": "Doe"}],
                "container-title": ["Journal Z"],
                "published": {"date-parts": [[2024]]},
                "is-referenced-by-count": 80
            }
        ]}}"#,
    );
    let orchestrator =
        test_orchestrator().client(Provider::Crossref, registry).repository(repo.clone()).build();
    let task = AgentTask::new(
        "disc-1",
        AgentKind::RelatedPaperDiscovery,
        json!({
            "paperId": "p4",
            "title": "Totally Different Source Title",
            "configurationType": "citation",
        }),
    );

    let first = orchestrator.run(&task).await;
    assert!(first.is_success(), "{:?}", first.error);
    let after_first = repo.discovered_papers().find_by_paper("p4").await.unwrap();
    assert_eq!(after_first.len(), 1);
    assert_eq!(first.data["newlyPersisted"].as_u64(), Some(1));

    let second = orchestrator.run(&task).await;
    assert!(second.is_success());
    let after_second = repo.discovered_papers().find_by_paper("p4").await.unwrap();
    assert_eq!(after_first, after_second, "second run must not duplicate pairs");
    assert_eq!(second.data["newlyPersisted"].as_u64(), Some(0));
}

#[tokio::test]
async fn quality_checker_runs_its_subchecks_in_parallel() {
    let ai = ok_client(r#"{"score": 0.85, "issues": [], "summary": "fine"}"#);
    let orchestrator = test_orchestrator().client(Provider::Anthropic, ai.clone()).build();
    let task = AgentTask::new(
        "qc-1",
        AgentKind::QualityChecker,
        json!({"itemId": "item-9", "content": "Plenty of text to check.", "checkType": "comprehensive"}),
    );

    let result = orchestrator.run(&task).await;
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(ai.calls(), 5, "comprehensive depth runs all five sub-checks");
    assert_eq!(result.data["checks"].as_array().unwrap().len(), 5);
    assert!((result.data["overallScore"].as_f64().unwrap() - 0.85).abs() < 1e-9);
    assert_eq!(result.data["grade"].as_str(), Some("B"));
}
