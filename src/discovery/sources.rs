//! Source adapters: each wraps one scholarly API behind the gated provider
//! handle and turns its wire format into candidates.

use crate::agent::{AgentContext, ProviderHandle};
use crate::agents::json_payload;
use crate::discovery::candidate::{Candidate, RelationshipKind, SourcePaper};
use crate::discovery::config::{DiscoveryConfig, DiscoverySource};
use crate::error::AgentError;
use crate::provider::Provider;
use crate::time::Deadline;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> DiscoverySource;

    async fn discover(
        &self,
        ctx: &AgentContext,
        paper: &SourcePaper,
        cfg: &DiscoveryConfig,
        deadline: Deadline,
    ) -> Result<Vec<Candidate>, AgentError>;
}

pub fn adapter_for(source: DiscoverySource) -> Box<dyn SourceAdapter> {
    match source {
        DiscoverySource::CitationNetwork => Box::new(CitationNetworkAdapter),
        DiscoverySource::AuthorNetwork => Box::new(AuthorNetworkAdapter),
        DiscoverySource::VenueNetwork => Box::new(VenueNetworkAdapter),
        DiscoverySource::SemanticSimilarity => Box::new(SemanticSimilarityAdapter),
        DiscoverySource::OpenResearch => Box::new(OpenResearchAdapter),
    }
}

// ---------------------------------------------------------------------------
// Crossref wire contract
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefResponse {
    pub status: Option<String>,
    #[serde(default)]
    pub message: CrossrefMessage,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CrossrefMessage {
    #[serde(default)]
    pub items: Vec<CrossrefWork>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CrossrefWork {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
    pub published: Option<CrossrefDate>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(rename = "is-referenced-by-count")]
    pub cited_by: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i64>>>,
}

impl CrossrefAuthor {
    pub(crate) fn full_name(&self) -> Option<String> {
        match (self.given.as_deref(), self.family.as_deref()) {
            (Some(given), Some(family)) => Some(format!("{given} {family}")),
            (None, Some(family)) => Some(family.to_string()),
            (Some(given), None) => Some(given.to_string()),
            (None, None) => None,
        }
    }
}

impl CrossrefWork {
    pub(crate) fn first_title(&self) -> Option<&str> {
        self.title.first().map(String::as_str).filter(|t| !t.trim().is_empty())
    }

    pub(crate) fn year(&self) -> Option<i32> {
        self.published
            .as_ref()?
            .date_parts
            .first()?
            .first()
            .copied()
            .flatten()
            .map(|y| y as i32)
    }

    pub(crate) fn author_names(&self) -> Vec<String> {
        self.author.iter().filter_map(CrossrefAuthor::full_name).collect()
    }

    fn into_candidate(
        self,
        source: DiscoverySource,
        relationship: RelationshipKind,
    ) -> Option<Candidate> {
        let title = self.first_title()?.to_string();
        let raw = serde_json::to_value(&self).unwrap_or_default();
        Some(Candidate {
            title,
            authors: self.author_names(),
            venue: self.container_title.first().cloned().filter(|v| !v.is_empty()),
            year: self.year(),
            doi: self.doi.clone(),
            url: self.url.clone(),
            citation_count: self.cited_by,
            source,
            relationship,
            relevance: 0.0,
            raw,
        })
    }
}

pub(crate) fn parse_crossref(response: &str) -> Result<Vec<CrossrefWork>, AgentError> {
    let payload =
        json_payload(response).ok_or_else(|| AgentError::Parse("no JSON in crossref response".into()))?;
    let parsed: CrossrefResponse = serde_json::from_str(payload)
        .map_err(|e| AgentError::Parse(format!("crossref response: {e}")))?;
    if let Some(status) = parsed.status.as_deref() {
        if status != "ok" {
            return Err(AgentError::Parse(format!("crossref status `{status}`")));
        }
    }
    Ok(parsed.message.items)
}

async fn crossref_works(
    handle: &ProviderHandle,
    query: &str,
    deadline: Deadline,
) -> Result<Vec<CrossrefWork>, AgentError> {
    let response = handle.call(query, deadline).await?;
    parse_crossref(&response)
}

const STOPWORDS: &[&str] =
    &["the", "with", "from", "this", "that", "into", "over", "under", "using", "towards", "for", "and"];

fn title_keywords(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .take(6)
        .map(str::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Forward citations through the source DOI, backward through title keywords.
pub struct CitationNetworkAdapter;

#[async_trait]
impl SourceAdapter for CitationNetworkAdapter {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::CitationNetwork
    }

    async fn discover(
        &self,
        ctx: &AgentContext,
        paper: &SourcePaper,
        cfg: &DiscoveryConfig,
        deadline: Deadline,
    ) -> Result<Vec<Candidate>, AgentError> {
        let handle = ctx.handle(Provider::Crossref)?;
        let per_direction = (cfg.max_papers_per_source / 2).max(1);
        let mut candidates = Vec::new();

        if let Some(doi) = paper.doi.as_deref().filter(|d| !d.is_empty()) {
            let query = format!("works?filter=reference:{doi}&rows={per_direction}");
            candidates.extend(
                crossref_works(handle, &query, deadline)
                    .await?
                    .into_iter()
                    .filter_map(|w| w.into_candidate(self.source(), RelationshipKind::CitedBySource)),
            );
        }

        let keywords = title_keywords(&paper.title);
        if !keywords.is_empty() {
            let query = format!(
                "works?query.bibliographic={}&rows={per_direction}",
                keywords.join("+")
            );
            candidates.extend(
                crossref_works(handle, &query, deadline)
                    .await?
                    .into_iter()
                    .filter_map(|w| w.into_candidate(self.source(), RelationshipKind::CitesSource)),
            );
        }

        candidates.truncate(cfg.max_papers_per_source);
        Ok(candidates)
    }
}

/// Other works by up to three of the source paper's authors.
pub struct AuthorNetworkAdapter;

#[async_trait]
impl SourceAdapter for AuthorNetworkAdapter {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::AuthorNetwork
    }

    async fn discover(
        &self,
        ctx: &AgentContext,
        paper: &SourcePaper,
        cfg: &DiscoveryConfig,
        deadline: Deadline,
    ) -> Result<Vec<Candidate>, AgentError> {
        let handle = ctx.handle(Provider::Crossref)?;
        let authors: Vec<&String> = paper.authors.iter().take(3).collect();
        if authors.is_empty() {
            return Ok(Vec::new());
        }
        let per_author = (cfg.max_papers_per_source / authors.len()).max(1);

        let mut candidates = Vec::new();
        for author in authors {
            let query = format!(
                "works?query.author={}&rows={per_author}",
                author.split_whitespace().collect::<Vec<_>>().join("+")
            );
            candidates.extend(
                crossref_works(handle, &query, deadline)
                    .await?
                    .into_iter()
                    .filter_map(|w| w.into_candidate(self.source(), RelationshipKind::SharedAuthor)),
            );
        }
        candidates.truncate(cfg.max_papers_per_source);
        Ok(candidates)
    }
}

/// Works from the same journal or conference.
pub struct VenueNetworkAdapter;

#[async_trait]
impl SourceAdapter for VenueNetworkAdapter {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::VenueNetwork
    }

    async fn discover(
        &self,
        ctx: &AgentContext,
        paper: &SourcePaper,
        cfg: &DiscoveryConfig,
        deadline: Deadline,
    ) -> Result<Vec<Candidate>, AgentError> {
        let Some(venue) = paper.venue.as_deref().filter(|v| !v.is_empty()) else {
            return Ok(Vec::new());
        };
        let handle = ctx.handle(Provider::Crossref)?;
        let query = format!(
            "works?query.container-title={}&rows={}",
            venue.split_whitespace().collect::<Vec<_>>().join("+"),
            cfg.max_papers_per_source
        );
        let mut candidates: Vec<Candidate> = crossref_works(handle, &query, deadline)
            .await?
            .into_iter()
            .filter_map(|w| w.into_candidate(self.source(), RelationshipKind::SameVenue))
            .collect();
        candidates.truncate(cfg.max_papers_per_source);
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Semantic Scholar
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct S2Response {
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Serialize, Deserialize)]
struct S2Paper {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(rename = "citationCount")]
    citation_count: Option<u64>,
    url: Option<String>,
    #[serde(rename = "externalIds")]
    external_ids: Option<S2Ids>,
}

#[derive(Debug, Serialize, Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct S2Ids {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

/// Similarity search over title + abstract.
pub struct SemanticSimilarityAdapter;

#[async_trait]
impl SourceAdapter for SemanticSimilarityAdapter {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::SemanticSimilarity
    }

    async fn discover(
        &self,
        ctx: &AgentContext,
        paper: &SourcePaper,
        cfg: &DiscoveryConfig,
        deadline: Deadline,
    ) -> Result<Vec<Candidate>, AgentError> {
        let handle = ctx.handle(Provider::SemanticScholar)?;
        let mut query_text = paper.title.clone();
        if let Some(abstract_text) = paper.abstract_text.as_deref() {
            let head: String = abstract_text.chars().take(300).collect();
            query_text.push(' ');
            query_text.push_str(&head);
        }
        let query = format!(
            "paper/search?query={}&limit={}",
            query_text.split_whitespace().collect::<Vec<_>>().join("+"),
            cfg.max_papers_per_source
        );

        let response = handle.call(&query, deadline).await?;
        let payload = json_payload(&response)
            .ok_or_else(|| AgentError::Parse("no JSON in semantic scholar response".into()))?;
        let parsed: S2Response = serde_json::from_str(payload)
            .map_err(|e| AgentError::Parse(format!("semantic scholar response: {e}")))?;

        let mut candidates = Vec::new();
        for item in parsed.data {
            let Some(title) = item.title.clone().filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let raw = serde_json::to_value(&item).unwrap_or_default();
            candidates.push(Candidate {
                title,
                authors: item.authors.into_iter().filter_map(|a| a.name).collect(),
                venue: item.venue.filter(|v| !v.is_empty()),
                year: item.year,
                doi: item.external_ids.and_then(|ids| ids.doi),
                url: item.url,
                citation_count: item.citation_count,
                source: self.source(),
                relationship: RelationshipKind::Similar,
                relevance: 0.0,
                raw,
            });
        }
        candidates.truncate(cfg.max_papers_per_source);
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Open-ended web research
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireRelated {
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    venue: Option<String>,
    year: Option<i32>,
    doi: Option<String>,
    url: Option<String>,
}

/// Natural-language related-work query against the web research provider.
pub struct OpenResearchAdapter;

fn related_from_lines(response: &str, source: DiscoverySource) -> Vec<Candidate> {
    response
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let title = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.splitn(2, ". ").nth(1).filter(|_| {
                    line.chars().next().is_some_and(|c| c.is_ascii_digit())
                }))?;
            let title = title.trim().trim_matches('"');
            (title.len() > 10).then(|| Candidate {
                title: title.to_string(),
                authors: Vec::new(),
                venue: None,
                year: None,
                doi: None,
                url: None,
                citation_count: None,
                source,
                relationship: RelationshipKind::Related,
                relevance: 0.0,
                raw: json!({ "line": line }),
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for OpenResearchAdapter {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::OpenResearch
    }

    async fn discover(
        &self,
        ctx: &AgentContext,
        paper: &SourcePaper,
        cfg: &DiscoveryConfig,
        deadline: Deadline,
    ) -> Result<Vec<Candidate>, AgentError> {
        let handle = ctx.handle(Provider::Perplexity)?;
        let prompt = format!(
            "List up to {} published academic papers closely related to \"{}\". \
             Return a JSON array of {{\"title\", \"authors\", \"venue\", \"year\", \"doi\", \"url\"}}.",
            cfg.max_papers_per_source, paper.title
        );
        let response = handle.call(&prompt, deadline).await?;

        let parsed = json_payload(&response)
            .and_then(|payload| serde_json::from_str::<Vec<WireRelated>>(payload).ok());
        let mut candidates = match parsed {
            Some(wires) => wires
                .into_iter()
                .filter_map(|w| {
                    let title = w.title.filter(|t| !t.trim().is_empty())?;
                    Some(Candidate {
                        title,
                        authors: w.authors,
                        venue: w.venue,
                        year: w.year,
                        doi: w.doi,
                        url: w.url,
                        citation_count: None,
                        source: self.source(),
                        relationship: RelationshipKind::Related,
                        relevance: 0.0,
                        raw: json!({ "api": "open_research" }),
                    })
                })
                .collect(),
            // Prose answers still often carry a usable list.
            None => related_from_lines(&response, self.source()),
        };
        candidates.truncate(cfg.max_papers_per_source);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CROSSREF_BODY: &str = r#"{
        "status": "ok",
        "message": {
            "items": [
                {
                    "DOI": "10.1000/one",
                    "title": ["First related paper"],
                    "author": [{"given": "Ada", "family": "Smith"}, {"family": "Jones"}],
                    "container-title": ["Journal X"],
                    "published": {"date-parts": [[2021, 5]]},
                    "URL": "https://example.org/one",
                    "is-referenced-by-count": 42
                },
                {"title": [], "author": []}
            ]
        }
    }"#;

    #[test]
    fn crossref_parsing_follows_the_wire_contract() {
        let works = parse_crossref(CROSSREF_BODY).unwrap();
        assert_eq!(works.len(), 2);
        let first = &works[0];
        assert_eq!(first.first_title(), Some("First related paper"));
        assert_eq!(first.year(), Some(2021));
        assert_eq!(first.author_names(), vec!["Ada Smith", "Jones"]);
        assert_eq!(first.cited_by, Some(42));
    }

    #[test]
    fn untitled_works_cannot_become_candidates() {
        let works = parse_crossref(CROSSREF_BODY).unwrap();
        let candidates: Vec<Candidate> = works
            .into_iter()
            .filter_map(|w| {
                w.into_candidate(DiscoverySource::CitationNetwork, RelationshipKind::CitesSource)
            })
            .collect();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].doi.as_deref(), Some("10.1000/one"));
    }

    #[test]
    fn crossref_error_status_is_a_parse_error() {
        let err = parse_crossref(r#"{"status": "error", "message": {"items": []}}"#).unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[test]
    fn crossref_tolerates_null_date_parts() {
        let body = r#"{"status": "ok", "message": {"items": [
            {"title": ["X"], "published": {"date-parts": [[null]]}}
        ]}}"#;
        let works = parse_crossref(body).unwrap();
        assert_eq!(works[0].year(), None);
    }

    #[test]
    fn title_keywords_drop_stopwords_and_short_words() {
        let kws = title_keywords("Towards the Adaptive Caching of Queries with LRU");
        assert!(kws.contains(&"adaptive".to_string()));
        assert!(kws.contains(&"caching".to_string()));
        assert!(!kws.contains(&"towards".to_string()));
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.contains(&"lru".to_string()), "three-letter words are dropped");
    }

    #[test]
    fn bullet_lists_become_candidates_when_json_is_absent() {
        let response = "Relevant work includes:\n- A Survey of Adaptive Caching Techniques\n* Query Result Caching at Scale\nnot a bullet";
        let candidates = related_from_lines(response, DiscoverySource::OpenResearch);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "A Survey of Adaptive Caching Techniques");
    }

    #[test]
    fn numbered_lists_become_candidates_too() {
        let response = "1. Paper About Large Caches\n2. Another Cache Paper Title";
        let candidates = related_from_lines(response, DiscoverySource::OpenResearch);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].title, "Another Cache Paper Title");
    }
}
