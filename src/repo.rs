//! Domain entities and the narrow repository interface agents persist
//! through.
//!
//! Writes go through `replace_for_paper`, a transactional delete-then-insert,
//! so re-running an agent on the same paper leaves storage in the same state
//! as running it once. Persistence is best-effort from the agents' point of
//! view: a failed write is logged and the AI result stands (the paid work
//! already happened).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RepoError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// Run a persistence future, logging failure instead of propagating it.
pub async fn best_effort<F>(what: &str, op: F)
where
    F: Future<Output = Result<(), RepoError>>,
{
    if let Err(err) = op.await {
        tracing::warn!(%err, what, "persistence failed; agent result unaffected");
    }
}

/// Section a piece of text was found in, inferred from the nearest heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionLabel {
    Introduction,
    Methods,
    References,
    Main,
}

impl fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SectionLabel::Introduction => "introduction",
            SectionLabel::Methods => "methods",
            SectionLabel::References => "references",
            SectionLabel::Main => "main",
        };
        f.write_str(s)
    }
}

impl FromStr for SectionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "introduction" => Ok(SectionLabel::Introduction),
            "methods" => Ok(SectionLabel::Methods),
            "references" => Ok(SectionLabel::References),
            "main" => Ok(SectionLabel::Main),
            other => Err(format!("unknown section label `{other}`")),
        }
    }
}

/// Every persisted entity is scoped to the paper it was derived from.
pub trait PaperScoped {
    fn paper_id(&self) -> &str;
}

macro_rules! paper_scoped {
    ($($ty:ty),* $(,)?) => {
        $(impl PaperScoped for $ty {
            fn paper_id(&self) -> &str {
                &self.paper_id
            }
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperContent {
    pub paper_id: String,
    pub text: String,
    pub processing_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSection {
    pub paper_id: String,
    pub heading: String,
    pub label: SectionLabel,
    pub text: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub paper_id: String,
    /// The text exactly as it appeared in the document.
    pub raw_text: String,
    pub context: String,
    pub section: SectionLabel,
    pub position: usize,
    pub authors: Vec<String>,
    pub title: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub citation_type: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationVerification {
    pub paper_id: String,
    pub raw_text: String,
    pub confidence: f64,
    pub needs_review: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub paper_id: String,
    pub summary_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataVerification {
    pub paper_id: String,
    pub field: String,
    pub value: String,
    pub verified: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub paper_id: String,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperTag {
    pub paper_id: String,
    pub tag_slug: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPaper {
    /// The source paper this discovery ran for.
    pub paper_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub citation_count: Option<u64>,
    pub source: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRelationship {
    pub paper_id: String,
    /// DOI when known, otherwise a normalised-title key.
    pub discovered_key: String,
    pub relationship: String,
    pub relevance: f64,
    pub origin: String,
}

paper_scoped!(
    PaperContent,
    PaperSection,
    Citation,
    CitationVerification,
    Summary,
    MetadataVerification,
    Tag,
    PaperTag,
    DiscoveredPaper,
    PaperRelationship,
);

/// Per-entity persistence operations the orchestrator needs.
#[async_trait]
pub trait EntityStore<T>: Send + Sync
where
    T: PaperScoped + Clone + Send + Sync + 'static,
{
    async fn find_by_paper(&self, paper_id: &str) -> Result<Vec<T>, RepoError>;
    async fn delete_by_paper(&self, paper_id: &str) -> Result<(), RepoError>;
    async fn save_all(&self, rows: Vec<T>) -> Result<(), RepoError>;
    /// Delete this paper's rows and insert `rows` in one transaction.
    async fn replace_for_paper(&self, paper_id: &str, rows: Vec<T>) -> Result<(), RepoError>;
}

/// The injected persistence boundary: one store per domain entity.
pub trait Repository: Send + Sync {
    fn paper_contents(&self) -> &dyn EntityStore<PaperContent>;
    fn paper_sections(&self) -> &dyn EntityStore<PaperSection>;
    fn citations(&self) -> &dyn EntityStore<Citation>;
    fn citation_verifications(&self) -> &dyn EntityStore<CitationVerification>;
    fn summaries(&self) -> &dyn EntityStore<Summary>;
    fn metadata_verifications(&self) -> &dyn EntityStore<MetadataVerification>;
    fn tags(&self) -> &dyn EntityStore<Tag>;
    fn paper_tags(&self) -> &dyn EntityStore<PaperTag>;
    fn discovered_papers(&self) -> &dyn EntityStore<DiscoveredPaper>;
    fn paper_relationships(&self) -> &dyn EntityStore<PaperRelationship>;
}

/// In-memory store: the test backend and a usable local persistence layer.
#[derive(Debug)]
pub struct MemStore<T> {
    rows: Mutex<HashMap<String, Vec<T>>>,
}

impl<T> Default for MemStore<T> {
    fn default() -> Self {
        Self { rows: Mutex::new(HashMap::new()) }
    }
}

impl<T> MemStore<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<T>>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<T> EntityStore<T> for MemStore<T>
where
    T: PaperScoped + Clone + Send + Sync + 'static,
{
    async fn find_by_paper(&self, paper_id: &str) -> Result<Vec<T>, RepoError> {
        Ok(self.lock().get(paper_id).cloned().unwrap_or_default())
    }

    async fn delete_by_paper(&self, paper_id: &str) -> Result<(), RepoError> {
        self.lock().remove(paper_id);
        Ok(())
    }

    async fn save_all(&self, rows: Vec<T>) -> Result<(), RepoError> {
        let mut map = self.lock();
        for row in rows {
            map.entry(row.paper_id().to_string()).or_default().push(row);
        }
        Ok(())
    }

    async fn replace_for_paper(&self, paper_id: &str, rows: Vec<T>) -> Result<(), RepoError> {
        // One lock across delete + insert keeps the swap atomic.
        let mut map = self.lock();
        map.remove(paper_id);
        if !rows.is_empty() {
            map.insert(paper_id.to_string(), rows);
        }
        Ok(())
    }
}

/// Complete in-memory [`Repository`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    paper_contents: MemStore<PaperContent>,
    paper_sections: MemStore<PaperSection>,
    citations: MemStore<Citation>,
    citation_verifications: MemStore<CitationVerification>,
    summaries: MemStore<Summary>,
    metadata_verifications: MemStore<MetadataVerification>,
    tags: MemStore<Tag>,
    paper_tags: MemStore<PaperTag>,
    discovered_papers: MemStore<DiscoveredPaper>,
    paper_relationships: MemStore<PaperRelationship>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for InMemoryRepository {
    fn paper_contents(&self) -> &dyn EntityStore<PaperContent> {
        &self.paper_contents
    }

    fn paper_sections(&self) -> &dyn EntityStore<PaperSection> {
        &self.paper_sections
    }

    fn citations(&self) -> &dyn EntityStore<Citation> {
        &self.citations
    }

    fn citation_verifications(&self) -> &dyn EntityStore<CitationVerification> {
        &self.citation_verifications
    }

    fn summaries(&self) -> &dyn EntityStore<Summary> {
        &self.summaries
    }

    fn metadata_verifications(&self) -> &dyn EntityStore<MetadataVerification> {
        &self.metadata_verifications
    }

    fn tags(&self) -> &dyn EntityStore<Tag> {
        &self.tags
    }

    fn paper_tags(&self) -> &dyn EntityStore<PaperTag> {
        &self.paper_tags
    }

    fn discovered_papers(&self) -> &dyn EntityStore<DiscoveredPaper> {
        &self.discovered_papers
    }

    fn paper_relationships(&self) -> &dyn EntityStore<PaperRelationship> {
        &self.paper_relationships
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(paper: &str, kind: &str) -> Summary {
        Summary { paper_id: paper.into(), summary_type: kind.into(), content: "text".into() }
    }

    #[tokio::test]
    async fn save_groups_rows_by_paper() {
        let store = MemStore::<Summary>::default();
        store
            .save_all(vec![summary("a", "brief"), summary("b", "brief"), summary("a", "detailed")])
            .await
            .unwrap();

        assert_eq!(store.find_by_paper("a").await.unwrap().len(), 2);
        assert_eq!(store.find_by_paper("b").await.unwrap().len(), 1);
        assert!(store.find_by_paper("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_is_idempotent() {
        let store = MemStore::<Summary>::default();
        let rows = vec![summary("a", "brief"), summary("a", "detailed")];

        store.replace_for_paper("a", rows.clone()).await.unwrap();
        let first = store.find_by_paper("a").await.unwrap();

        store.replace_for_paper("a", rows).await.unwrap();
        let second = store.find_by_paper("a").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn replace_does_not_touch_other_papers() {
        let store = MemStore::<Summary>::default();
        store.save_all(vec![summary("a", "brief"), summary("b", "brief")]).await.unwrap();
        store.replace_for_paper("a", vec![summary("a", "detailed")]).await.unwrap();

        assert_eq!(store.find_by_paper("a").await.unwrap()[0].summary_type, "detailed");
        assert_eq!(store.find_by_paper("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_only_that_paper() {
        let store = MemStore::<Summary>::default();
        store.save_all(vec![summary("a", "brief"), summary("b", "brief")]).await.unwrap();
        store.delete_by_paper("a").await.unwrap();

        assert!(store.find_by_paper("a").await.unwrap().is_empty());
        assert_eq!(store.find_by_paper("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn best_effort_swallows_and_logs() {
        // Must not panic or propagate.
        best_effort("summaries", async {
            Err(RepoError::Unavailable("connection refused".into()))
        })
        .await;
    }
}
