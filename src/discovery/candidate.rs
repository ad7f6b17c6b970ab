//! Discovered-paper candidates: relevance scoring and cross-source dedup.

use crate::discovery::config::DiscoverySource;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The paper discovery runs for.
#[derive(Debug, Clone, Default)]
pub struct SourcePaper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub doi: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
}

/// How a candidate relates to the source paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    CitesSource,
    CitedBySource,
    SharedAuthor,
    SameVenue,
    Similar,
    Related,
}

impl RelationshipKind {
    pub fn name(&self) -> &'static str {
        match self {
            RelationshipKind::CitesSource => "cites_source",
            RelationshipKind::CitedBySource => "cited_by_source",
            RelationshipKind::SharedAuthor => "shared_author",
            RelationshipKind::SameVenue => "same_venue",
            RelationshipKind::Similar => "similar",
            RelationshipKind::Related => "related",
        }
    }
}

/// A paper surfaced by one discovery strategy; transient until deduplicated
/// and persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub title: String,
    pub authors: Vec<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub citation_count: Option<u64>,
    pub source: DiscoverySource,
    pub relationship: RelationshipKind,
    pub relevance: f64,
    pub raw: Value,
}

pub fn normalize_title(title: &str) -> String {
    let mut normalized = String::with_capacity(title.len());
    let mut last_space = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            normalized.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            normalized.push(' ');
            last_space = true;
        }
    }
    normalized.trim_end().to_string()
}

fn normalize_author(author: &str) -> String {
    author.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Dedup key: case-insensitive DOI when present, normalised title otherwise.
pub fn dedup_key(candidate: &Candidate) -> String {
    match candidate.doi.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(doi) => format!("doi:{}", doi.to_lowercase()),
        None => format!("title:{}", normalize_title(&candidate.title)),
    }
}

/// Whether a candidate is the source paper itself.
pub fn matches_source(candidate: &Candidate, source: &SourcePaper) -> bool {
    if let (Some(a), Some(b)) = (candidate.doi.as_deref(), source.doi.as_deref()) {
        if !a.is_empty() && a.eq_ignore_ascii_case(b) {
            return true;
        }
    }
    !source.title.is_empty() && normalize_title(&candidate.title) == normalize_title(&source.title)
}

/// Approximate current calendar year; precision to the year is all recency
/// scoring needs.
pub fn current_year() -> i32 {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    1970 + (secs / 31_556_952) as i32
}

/// Weighted relevance in [0, 1]: citation count up to 0.3, recency within
/// five years up to 0.2, author overlap up to 0.2, venue match 0.1, all over
/// a base of 0.5.
pub fn relevance(candidate: &Candidate, source: &SourcePaper, now_year: i32) -> f64 {
    let mut score = 0.5;

    if let Some(citations) = candidate.citation_count {
        score += 0.3 * (citations as f64 / 100.0).min(1.0);
    }

    if let Some(year) = candidate.year {
        let age = (now_year - year).max(0) as f64;
        if age <= 5.0 {
            score += 0.2 * (1.0 - age / 5.0);
        }
    }

    if !source.authors.is_empty() && !candidate.authors.is_empty() {
        let source_authors: Vec<String> =
            source.authors.iter().map(|a| normalize_author(a)).collect();
        let shared = candidate
            .authors
            .iter()
            .filter(|a| source_authors.contains(&normalize_author(a)))
            .count();
        score += 0.2 * (shared as f64 / source.authors.len() as f64).min(1.0);
    }

    if let (Some(cv), Some(sv)) = (candidate.venue.as_deref(), source.venue.as_deref()) {
        if !cv.is_empty() && normalize_title(cv) == normalize_title(sv) {
            score += 0.1;
        }
    }

    score.min(1.0)
}

/// Collapse duplicates across sources, keeping the higher-relevance copy and
/// first-seen order.
pub fn dedup(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        let key = dedup_key(&candidate);
        match by_key.get(&key) {
            Some(&at) => {
                if candidate.relevance > kept[at].relevance {
                    kept[at] = candidate;
                }
            }
            None => {
                by_key.insert(key, kept.len());
                kept.push(candidate);
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(title: &str, doi: Option<&str>, relevance_score: f64) -> Candidate {
        Candidate {
            title: title.to_string(),
            authors: vec![],
            venue: None,
            year: None,
            doi: doi.map(str::to_string),
            url: None,
            citation_count: None,
            source: DiscoverySource::CitationNetwork,
            relationship: RelationshipKind::Related,
            relevance: relevance_score,
            raw: json!({}),
        }
    }

    fn source_paper() -> SourcePaper {
        SourcePaper {
            id: "p1".into(),
            title: "Adaptive Query Caching".into(),
            authors: vec!["Ada Smith".into(), "Bo Jones".into()],
            doi: Some("10.1/abc".into()),
            venue: Some("VLDB".into()),
            year: Some(2022),
            abstract_text: None,
        }
    }

    #[test]
    fn relevance_stays_in_unit_interval() {
        let source = source_paper();
        let mut c = candidate("Everything maxed", None, 0.0);
        c.citation_count = Some(100_000);
        c.year = Some(2026);
        c.authors = vec!["Ada Smith".into(), "Bo Jones".into()];
        c.venue = Some("vldb".into());
        let score = relevance(&c, &source, 2026);
        assert!(score <= 1.0);
        assert!(score >= 0.99);

        let empty = candidate("Nothing", None, 0.0);
        let base = relevance(&empty, &source, 2026);
        assert!((base - 0.5).abs() < 1e-9);
    }

    #[test]
    fn citation_component_caps_at_point_three() {
        let source = source_paper();
        let mut hundred = candidate("a", None, 0.0);
        hundred.citation_count = Some(100);
        let mut million = candidate("b", None, 0.0);
        million.citation_count = Some(1_000_000);
        assert_eq!(
            relevance(&hundred, &source, 2026),
            relevance(&million, &source, 2026)
        );
    }

    #[test]
    fn recency_decays_over_five_years() {
        let source = source_paper();
        let mut fresh = candidate("a", None, 0.0);
        fresh.year = Some(2026);
        let mut old = candidate("b", None, 0.0);
        old.year = Some(2019);
        let f = relevance(&fresh, &source, 2026);
        let o = relevance(&old, &source, 2026);
        assert!((f - 0.7).abs() < 1e-9);
        assert!((o - 0.5).abs() < 1e-9);
    }

    #[test]
    fn author_overlap_is_a_ratio_of_source_authors() {
        let source = source_paper();
        let mut one_shared = candidate("a", None, 0.0);
        one_shared.authors = vec!["ada smith".into(), "Xeno Y".into()];
        let score = relevance(&one_shared, &source, 2030);
        assert!((score - 0.6).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn dedup_prefers_the_higher_relevance_copy() {
        let a = candidate("Paper", Some("10.1/DUP"), 0.6);
        let b = candidate("Paper again", Some("10.1/dup"), 0.9);
        let out = dedup(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].relevance, 0.9);
    }

    #[test]
    fn dedup_falls_back_to_normalised_titles() {
        let a = candidate("Adaptive Query Caching!", None, 0.5);
        let b = candidate("adaptive query   caching", None, 0.4);
        let c = candidate("A Different Paper", None, 0.4);
        let out = dedup(vec![a, b, c]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn source_paper_is_recognised_by_doi_or_title() {
        let source = source_paper();
        let by_doi = candidate("Renamed", Some("10.1/ABC"), 0.0);
        assert!(matches_source(&by_doi, &source));

        let by_title = candidate("Adaptive  Query Caching", None, 0.0);
        assert!(matches_source(&by_title, &source));

        let other = candidate("Unrelated", Some("10.9/z"), 0.0);
        assert!(!matches_source(&other, &source));
    }

    #[test]
    fn current_year_is_plausible() {
        let year = current_year();
        assert!((2024..2100).contains(&year));
    }
}
