//! Citation formatting: extract raw citations from document text, structure
//! them through an AI provider in small batches, and render per-style
//! bibliographies. A rule-based formatter covers the fallback path.
//!
//! Structured entries are attributed to their raw citation by an explicit
//! index the provider must echo back, and the raw text is stored inside the
//! structured record; batch reordering or dropped entries therefore cannot
//! mis-attribute raw text.

use crate::agent::{Agent, AgentContext, ProviderHandle};
use crate::agents::{char_ceil, context_window, find_year, json_payload};
use crate::error::{AgentError, ErrorClass};
use crate::provider::Provider;
use crate::repo::{best_effort, Citation, CitationVerification, SectionLabel};
use crate::task::{AgentKind, AgentTask, TaskInput};
use crate::time::Deadline;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How many raw citations go to the provider per structuring request.
pub const STRUCTURE_BATCH_SIZE: usize = 5;

/// Structured entries below this confidence get a review row.
const REVIEW_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CitationStyle {
    Apa,
    Mla,
    Chicago,
    Ieee,
    Harvard,
}

impl CitationStyle {
    pub const ALL: [CitationStyle; 5] = [
        CitationStyle::Apa,
        CitationStyle::Mla,
        CitationStyle::Chicago,
        CitationStyle::Ieee,
        CitationStyle::Harvard,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CitationStyle::Apa => "APA",
            CitationStyle::Mla => "MLA",
            CitationStyle::Chicago => "Chicago",
            CitationStyle::Ieee => "IEEE",
            CitationStyle::Harvard => "Harvard",
        }
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CitationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CitationStyle::ALL
            .into_iter()
            .find(|style| style.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown citation style `{s}`"))
    }
}

/// A citation as it appeared in the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawCitation {
    pub text: String,
    pub position: usize,
    pub context: String,
    pub section: SectionLabel,
}

/// One style's rendered bibliography, or the error that prevented it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bibliography {
    pub style: CitationStyle,
    pub entries: Vec<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

fn heading_label(line: &str) -> Option<SectionLabel> {
    let trimmed = line.trim().trim_end_matches(':');
    if trimmed.is_empty() || trimmed.len() > 60 {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    let name = lower.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.').trim();
    match name {
        "introduction" => Some(SectionLabel::Introduction),
        "method" | "methods" | "methodology" | "materials and methods" => {
            Some(SectionLabel::Methods)
        }
        "references" | "bibliography" | "works cited" => Some(SectionLabel::References),
        _ => None,
    }
}

pub(crate) fn scan_headings(text: &str) -> Vec<(usize, SectionLabel)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(label) = heading_label(line) {
            headings.push((offset, label));
        }
        offset += line.len();
    }
    headings
}

fn section_at(headings: &[(usize, SectionLabel)], position: usize) -> SectionLabel {
    headings
        .iter()
        .rev()
        .find(|(offset, _)| *offset <= position)
        .map(|(_, label)| *label)
        .unwrap_or(SectionLabel::Main)
}

fn scan_numeric(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            let mut digits = false;
            let mut valid = true;
            while j < bytes.len() && j - i <= 24 {
                match bytes[j] {
                    b']' => break,
                    b'0'..=b'9' => {
                        digits = true;
                        j += 1;
                    }
                    b',' | b' ' | b'-' => j += 1,
                    _ => {
                        valid = false;
                        break;
                    }
                }
            }
            if valid && digits && j < bytes.len() && bytes[j] == b']' {
                spans.push((i, j + 1));
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    spans
}

fn scan_parenthetical(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'(' {
            if let Some(close) = bytes[i + 1..].iter().take(120).position(|&b| b == b')') {
                let j = i + 1 + close;
                let inner = &text[i + 1..j];
                let author_led =
                    inner.trim_start().chars().next().is_some_and(|c| c.is_uppercase());
                if author_led && find_year(inner).is_some() {
                    spans.push((i, j + 1));
                    i = j + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    spans
}

fn scan_et_al(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut search = 0;
    while let Some(found) = text[search..].find("et al") {
        let at = search + found;
        let after_start = at + "et al".len();
        let after_end = char_ceil(text, (after_start + 14).min(text.len()));
        let tail = &text[after_start..after_end];
        if let Some((_, year_end)) = leading_year_span(tail) {
            let start = author_start(text, at);
            spans.push((start, after_start + year_end));
        }
        search = after_start;
    }
    spans
}

/// Year span at the head of an "et al" tail like "., 2021)" — returns byte
/// offsets into the tail.
fn leading_year_span(tail: &str) -> Option<(usize, usize)> {
    let mut seen_digits = 0;
    let mut start = None;
    for (i, c) in tail.char_indices() {
        if c.is_ascii_digit() {
            if start.is_none() {
                start = Some(i);
                seen_digits = 0;
            }
            seen_digits += 1;
            if seen_digits == 4 {
                let s = start?;
                let year: i32 = tail[s..i + 1].parse().ok()?;
                if (1500..=2100).contains(&year) {
                    return Some((s, i + 1));
                }
                return None;
            }
        } else if matches!(c, '.' | ',' | ' ' | '(') {
            start = None;
        } else {
            return None;
        }
    }
    None
}

/// Walk back from "et al" to include the preceding author surname.
fn author_start(text: &str, et_at: usize) -> usize {
    let before = text[..et_at].trim_end();
    let word_start = before
        .rfind(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|i| char_ceil(before, i + 1))
        .unwrap_or(0);
    let word = &before[word_start..];
    if word.chars().next().is_some_and(|c| c.is_uppercase()) {
        word_start
    } else {
        et_at
    }
}

fn overlaps(spans: &[(usize, usize)], candidate: (usize, usize)) -> bool {
    spans.iter().any(|&(s, e)| candidate.0 < e && s < candidate.1)
}

/// Scan document text for the known citation shapes: numeric `[12]`,
/// parenthetical `(Smith, 2021)`, and `Smith et al., 2021`. Each match keeps
/// its position, surrounding context, and the section label inferred from the
/// nearest heading.
pub fn extract_citations(text: &str) -> Vec<RawCitation> {
    let headings = scan_headings(text);
    let mut spans = scan_parenthetical(text);
    for span in scan_et_al(text) {
        if !overlaps(&spans, span) {
            spans.push(span);
        }
    }
    for span in scan_numeric(text) {
        if !overlaps(&spans, span) {
            spans.push(span);
        }
    }
    spans.sort_by_key(|&(start, _)| start);
    spans
        .into_iter()
        .map(|(start, end)| RawCitation {
            text: text[start..end].to_string(),
            position: start,
            context: context_window(text, start, end, 100).trim().to_string(),
            section: section_at(&headings, start),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Structuring
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireCitation {
    index: Option<usize>,
    #[serde(default)]
    authors: Vec<String>,
    title: Option<String>,
    venue: Option<String>,
    year: Option<i32>,
    volume: Option<String>,
    issue: Option<String>,
    pages: Option<String>,
    doi: Option<String>,
    url: Option<String>,
    #[serde(rename = "type")]
    citation_type: Option<String>,
    confidence: Option<f64>,
}

fn structure_prompt(batch: &[RawCitation]) -> String {
    let items: Vec<Value> = batch
        .iter()
        .enumerate()
        .map(|(index, raw)| json!({"index": index, "text": raw.text, "context": raw.context}))
        .collect();
    format!(
        "Extract bibliographic data from these in-text citations. Return a JSON array; \
         each element must carry the `index` of the input it describes plus any of: \
         authors (array), title, venue, year, volume, issue, pages, doi, type, \
         confidence (0..1).\n{}",
        Value::Array(items)
    )
}

fn minimal_citation(paper_id: &str, raw: &RawCitation) -> Citation {
    Citation {
        paper_id: paper_id.to_string(),
        raw_text: raw.text.clone(),
        context: raw.context.clone(),
        section: raw.section,
        position: raw.position,
        authors: Vec::new(),
        title: None,
        venue: None,
        year: find_year(&raw.text),
        volume: None,
        issue: None,
        pages: None,
        doi: None,
        url: None,
        citation_type: None,
        confidence: 0.0,
    }
}

/// Attach the provider's structured entries to their raw citations by the
/// echoed index. Entries with a missing or out-of-range index are discarded
/// rather than guessed at; uncovered raws fall back to a minimal record.
fn parse_structure_response(
    paper_id: &str,
    batch: &[RawCitation],
    response: &str,
) -> Result<Vec<Citation>, AgentError> {
    let payload = json_payload(response)
        .ok_or_else(|| AgentError::Parse("no JSON in structuring response".into()))?;
    let wires: Vec<WireCitation> = serde_json::from_str(payload)
        .map_err(|e| AgentError::Parse(format!("structuring response: {e}")))?;

    let mut slots: Vec<Option<Citation>> = vec![None; batch.len()];
    for wire in wires {
        let Some(index) = wire.index.filter(|&i| i < batch.len()) else {
            tracing::debug!("structured entry without a usable index discarded");
            continue;
        };
        let raw = &batch[index];
        slots[index] = Some(Citation {
            paper_id: paper_id.to_string(),
            raw_text: raw.text.clone(),
            context: raw.context.clone(),
            section: raw.section,
            position: raw.position,
            authors: wire.authors,
            title: wire.title,
            venue: wire.venue,
            year: wire.year.or_else(|| find_year(&raw.text)),
            volume: wire.volume,
            issue: wire.issue,
            pages: wire.pages,
            doi: wire.doi,
            url: wire.url,
            citation_type: wire.citation_type,
            confidence: wire.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        });
    }
    Ok(slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.unwrap_or_else(|| minimal_citation(paper_id, &batch[i])))
        .collect())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn format_prompt(style: CitationStyle, citations: &[Citation]) -> String {
    let items: Vec<Value> = citations
        .iter()
        .map(|c| {
            json!({
                "authors": c.authors,
                "title": c.title,
                "venue": c.venue,
                "year": c.year,
                "volume": c.volume,
                "issue": c.issue,
                "pages": c.pages,
                "doi": c.doi,
            })
        })
        .collect();
    format!(
        "Format these citations as a {style} bibliography, one entry per line, \
         no numbering or commentary.\n{}",
        Value::Array(items)
    )
}

fn sort_bibliography(entries: &mut [String]) {
    entries.sort_by_key(|e| {
        e.trim_start_matches(|c: char| c == '[' || c == ']' || c.is_ascii_digit() || c == ' ')
            .to_lowercase()
    });
}

async fn format_bibliography(
    handle: &ProviderHandle,
    style: CitationStyle,
    citations: &[Citation],
    deadline: Deadline,
) -> Bibliography {
    match handle.call(&format_prompt(style, citations), deadline).await {
        Ok(response) => {
            let mut entries: Vec<String> = response
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("```"))
                .map(str::to_string)
                .collect();
            sort_bibliography(&mut entries);
            Bibliography { style, entries, error: None }
        }
        Err(err) => {
            tracing::warn!(%style, %err, "bibliography formatting failed for style");
            Bibliography { style, entries: Vec::new(), error: Some(err.to_string()) }
        }
    }
}

fn requested_styles(input: &TaskInput) -> Result<Vec<CitationStyle>, AgentError> {
    let names = input.str_list("citationStyles");
    if names.is_empty() {
        return Ok(vec![CitationStyle::Apa]);
    }
    let mut styles = Vec::new();
    for name in names {
        let style = name
            .parse::<CitationStyle>()
            .map_err(AgentError::InvalidInput)?;
        if !styles.contains(&style) {
            styles.push(style);
        }
    }
    Ok(styles)
}

async fn resolve_content(ctx: &AgentContext, task: &AgentTask) -> Result<(String, String), AgentError> {
    let paper_id = task.input.opt_str("paperId").unwrap_or_default().to_string();
    if let Some(content) = task.input.opt_str("documentContent") {
        return Ok((paper_id, content.to_string()));
    }
    if paper_id.is_empty() {
        return Err(AgentError::InvalidInput(
            "missing required field (one of `documentContent`, `paperId`)".into(),
        ));
    }
    let rows = ctx
        .repo
        .paper_contents()
        .find_by_paper(&paper_id)
        .await
        .map_err(|e| AgentError::Persistence(e.to_string()))?;
    rows.into_iter()
        .next()
        .map(|row| (paper_id.clone(), row.text))
        .ok_or_else(|| AgentError::InvalidInput(format!("no stored content for paper `{paper_id}`")))
}

async fn persist_citations(ctx: &AgentContext, paper_id: &str, citations: &[Citation]) {
    if paper_id.is_empty() {
        return;
    }
    best_effort(
        "citations",
        ctx.repo.citations().replace_for_paper(paper_id, citations.to_vec()),
    )
    .await;

    let reviews: Vec<CitationVerification> = citations
        .iter()
        .filter(|c| c.confidence < REVIEW_CONFIDENCE)
        .map(|c| CitationVerification {
            paper_id: paper_id.to_string(),
            raw_text: c.raw_text.clone(),
            confidence: c.confidence,
            needs_review: true,
        })
        .collect();
    best_effort(
        "citation_verifications",
        ctx.repo.citation_verifications().replace_for_paper(paper_id, reviews),
    )
    .await;
}

fn result_data(
    raws: &[RawCitation],
    structured: &[Citation],
    bibliographies: &[Bibliography],
) -> Value {
    json!({
        "rawCitations": raws.len(),
        "structuredCitations": structured,
        "bibliographies": bibliographies,
    })
}

// ---------------------------------------------------------------------------
// Primary agent
// ---------------------------------------------------------------------------

pub struct CitationFormatter {
    provider: Provider,
}

impl CitationFormatter {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }
}

impl Default for CitationFormatter {
    fn default() -> Self {
        Self::new(Provider::OpenAi)
    }
}

#[async_trait]
impl Agent for CitationFormatter {
    fn kind(&self) -> AgentKind {
        AgentKind::CitationFormatter
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn estimate(&self, task: &AgentTask) -> Duration {
        let content_len = task.input.opt_str("documentContent").map_or(20_000, str::len);
        Duration::from_millis(2_000 + (content_len as u64 / 1_000) * 150)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_any_str(&["documentContent", "paperId"])?;
        requested_styles(&task.input).map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let styles = requested_styles(&task.input)?;
        let (paper_id, content) = resolve_content(ctx, task).await?;

        let raws = extract_citations(&content);
        if raws.is_empty() {
            return Ok(result_data(&raws, &[], &[]));
        }
        tracing::debug!(count = raws.len(), paper = %paper_id, "raw citations extracted");

        let handle = ctx.handle(self.provider)?;
        let batches: Vec<&[RawCitation]> = raws.chunks(STRUCTURE_BATCH_SIZE).collect();
        let jobs: Vec<BoxFuture<'_, Result<Vec<Citation>, AgentError>>> = batches
            .iter()
            .map(|&batch| {
                let handle = handle.clone();
                let paper_id = paper_id.clone();
                Box::pin(async move {
                    let response = handle.call(&structure_prompt(batch), deadline).await?;
                    parse_structure_response(&paper_id, batch, &response)
                }) as BoxFuture<'_, _>
            })
            .collect();

        let results = ctx
            .pool
            .run_parallel(deadline.remaining(ctx.clock.as_ref()), jobs)
            .await;

        let mut structured = Vec::with_capacity(raws.len());
        for (batch, outcome) in batches.iter().zip(results) {
            match outcome {
                Ok(rows) => structured.extend(rows),
                Err(err) if err.class() == ErrorClass::NonRetryable => {
                    // Per-item fallback: keep the batch as minimal records.
                    tracing::warn!(%err, "structuring batch unusable, keeping minimal records");
                    structured.extend(batch.iter().map(|raw| minimal_citation(&paper_id, raw)));
                }
                // Retryable batch failures abort the whole step so the retry
                // policy can rerun it; the deadline class is terminal anyway.
                Err(err) => return Err(err),
            }
        }

        let mut bibliographies = Vec::with_capacity(styles.len());
        for style in styles {
            bibliographies.push(format_bibliography(handle, style, &structured, deadline).await);
        }

        persist_citations(ctx, &paper_id, &structured).await;
        Ok(result_data(&raws, &structured, &bibliographies))
    }
}

// ---------------------------------------------------------------------------
// Rule-based fallback
// ---------------------------------------------------------------------------

/// Deterministic citation formatter: everything comes from pattern
/// extraction, no provider involved.
#[derive(Debug, Default)]
pub struct RuleBasedCitationFormatter;

fn scan_doi(line: &str) -> Option<String> {
    let at = line.find("10.")?;
    let prefix_ok = at == 0
        || line[..at].ends_with([' ', '(', ':'])
        || line[..at].to_ascii_lowercase().ends_with("doi.org/");
    if !prefix_ok {
        return None;
    }
    let tail: String = line[at..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ';' && *c != ')')
        .collect();
    let tail = tail.trim_end_matches(['.', ',']).to_string();
    tail.contains('/').then_some(tail)
}

fn scan_url(line: &str) -> Option<String> {
    let at = line.find("http")?;
    let url: String = line[at..].chars().take_while(|c| !c.is_whitespace()).collect();
    Some(url.trim_end_matches(['.', ',']).to_string())
}

/// Parse one reference-list line into `{authors, year, title, venue, doi,
/// url}` by position: authors up to the first period, title next, venue
/// after.
fn parse_reference_entry(paper_id: &str, line: &str, position: usize) -> Citation {
    let cleaned = line
        .trim()
        .trim_start_matches(|c: char| c == '[' || c.is_ascii_digit() || c == ']' || c == ' ');
    let year = find_year(cleaned);
    let doi = scan_doi(cleaned);
    let url = scan_url(cleaned);

    let mut segments = cleaned.split(". ").map(str::trim).filter(|s| !s.is_empty());
    let author_segment = segments.next().unwrap_or_default();
    let authors: Vec<String> = author_segment
        .split(|c| c == ',' || c == '&')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect();
    let title = segments.next().map(|s| s.trim_end_matches('.').to_string());
    let venue = segments.next().map(|s| {
        s.split(',').next().unwrap_or(s).trim_end_matches('.').trim().to_string()
    });

    Citation {
        paper_id: paper_id.to_string(),
        raw_text: line.trim().to_string(),
        context: line.trim().to_string(),
        section: SectionLabel::References,
        position,
        authors,
        title,
        venue,
        year,
        volume: None,
        issue: None,
        pages: None,
        doi,
        url,
        citation_type: None,
        confidence: 0.3,
    }
}

fn reference_entries(content: &str) -> Vec<(usize, String)> {
    let headings = scan_headings(content);
    let Some(&(refs_at, _)) =
        headings.iter().rev().find(|(_, label)| *label == SectionLabel::References)
    else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    let mut offset = refs_at;
    for line in content[refs_at..].split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.len() > 20 && heading_label(line).is_none() {
            entries.push((offset, trimmed.to_string()));
        }
        offset += line.len();
    }
    entries
}

fn surname_key(citation: &Citation) -> String {
    citation
        .authors
        .first()
        .map(|a| a.split_whitespace().next().unwrap_or(a).to_lowercase())
        .unwrap_or_else(|| citation.raw_text.to_lowercase())
}

fn render_entry(style: CitationStyle, citation: &Citation, number: usize) -> String {
    let authors = if citation.authors.is_empty() {
        "Unknown".to_string()
    } else {
        citation.authors.join(", ")
    };
    let year = citation.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into());
    let title = citation.title.clone().unwrap_or_else(|| "Untitled".into());
    let venue = citation.venue.clone().unwrap_or_default();
    let doi = citation.doi.as_deref().map(|d| format!(" https://doi.org/{d}")).unwrap_or_default();

    match style {
        CitationStyle::Apa => format!("{authors} ({year}). {title}. {venue}.{doi}"),
        CitationStyle::Mla => format!("{authors}. \"{title}.\" {venue}, {year}.{doi}"),
        CitationStyle::Chicago => format!("{authors}. {year}. \"{title}.\" {venue}.{doi}"),
        CitationStyle::Ieee => format!("[{number}] {authors}, \"{title},\" {venue}, {year}.{doi}"),
        CitationStyle::Harvard => format!("{authors} {year}, '{title}', {venue}.{doi}"),
    }
}

fn render_bibliography(style: CitationStyle, citations: &[Citation]) -> Bibliography {
    let mut ordered: Vec<&Citation> = citations.iter().collect();
    ordered.sort_by_key(|c| surname_key(c));
    let entries = ordered
        .iter()
        .enumerate()
        .map(|(i, c)| render_entry(style, c, i + 1))
        .collect();
    Bibliography { style, entries, error: None }
}

#[async_trait]
impl Agent for RuleBasedCitationFormatter {
    fn kind(&self) -> AgentKind {
        AgentKind::CitationFormatter
    }

    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn estimate(&self, _task: &AgentTask) -> Duration {
        Duration::from_millis(200)
    }

    fn validate(&self, task: &AgentTask) -> Result<(), AgentError> {
        task.input.require_any_str(&["documentContent", "paperId"])?;
        requested_styles(&task.input).map(|_| ())
    }

    async fn step(
        &self,
        ctx: &AgentContext,
        task: &AgentTask,
        _deadline: Deadline,
    ) -> Result<Value, AgentError> {
        let styles = requested_styles(&task.input)?;
        let (paper_id, content) = resolve_content(ctx, task).await?;

        let raws = extract_citations(&content);
        let structured: Vec<Citation> = {
            let entries = reference_entries(&content);
            if entries.is_empty() {
                raws.iter().map(|raw| minimal_citation(&paper_id, raw)).collect()
            } else {
                entries
                    .iter()
                    .map(|(position, line)| parse_reference_entry(&paper_id, line, *position))
                    .collect()
            }
        };

        let bibliographies: Vec<Bibliography> =
            styles.into_iter().map(|style| render_bibliography(style, &structured)).collect();

        persist_citations(ctx, &paper_id, &structured).await;
        Ok(result_data(&raws, &structured, &bibliographies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Introduction\n\
        Prior work (Smith, 2021) established the baseline. Jones et al., 2019 \
        extended it, and later results [12] confirmed the effect.\n\
        Methods\n\
        We follow the protocol of [3, 4].\n\
        References\n\
        [1] Smith J. Deep parsing of citations. Journal X, 2021. 10.1000/jx.2021.42\n\
        [2] Jones A, Brown B. Extending baselines. Conf Y, 2019.\n";

    #[test]
    fn extracts_all_three_citation_shapes() {
        let raws = extract_citations(DOC);
        let texts: Vec<&str> = raws.iter().map(|r| r.text.as_str()).collect();
        assert!(texts.contains(&"(Smith, 2021)"), "parenthetical missing: {texts:?}");
        assert!(texts.iter().any(|t| t.starts_with("Jones et al")), "et-al missing: {texts:?}");
        assert!(texts.contains(&"[12]"), "numeric missing: {texts:?}");
        assert!(texts.contains(&"[3, 4]"), "numeric list missing: {texts:?}");
    }

    #[test]
    fn sections_follow_nearest_heading() {
        let raws = extract_citations(DOC);
        let parenthetical = raws.iter().find(|r| r.text == "(Smith, 2021)").unwrap();
        assert_eq!(parenthetical.section, SectionLabel::Introduction);

        let methods = raws.iter().find(|r| r.text == "[3, 4]").unwrap();
        assert_eq!(methods.section, SectionLabel::Methods);

        let refs = raws.iter().find(|r| r.text == "[1]").unwrap();
        assert_eq!(refs.section, SectionLabel::References);
    }

    #[test]
    fn context_surrounds_the_match() {
        let raws = extract_citations(DOC);
        let parenthetical = raws.iter().find(|r| r.text == "(Smith, 2021)").unwrap();
        assert!(parenthetical.context.contains("baseline"));
        assert!(parenthetical.context.len() <= 2 * 100 + parenthetical.text.len() + 2);
    }

    #[test]
    fn plain_parentheses_are_not_citations() {
        let raws = extract_citations("We measured temperature (in Kelvin) daily.");
        assert!(raws.is_empty());
    }

    #[test]
    fn structure_response_attributes_by_index() {
        let raws = extract_citations(DOC);
        let batch = &raws[..2];
        // Out of order on purpose, plus one junk index.
        let response = r#"[
            {"index": 1, "authors": ["Jones A"], "year": 2019, "confidence": 0.9},
            {"index": 0, "authors": ["Smith J"], "title": "Deep parsing", "year": 2021, "confidence": 0.8},
            {"index": 99, "authors": ["Ghost"], "year": 1900}
        ]"#;
        let structured = parse_structure_response("p1", batch, response).unwrap();
        assert_eq!(structured.len(), 2);
        assert_eq!(structured[0].raw_text, batch[0].text);
        assert_eq!(structured[0].authors, vec!["Smith J"]);
        assert_eq!(structured[0].year, Some(2021));
        assert_eq!(structured[1].raw_text, batch[1].text);
        assert_eq!(structured[1].authors, vec!["Jones A"]);
    }

    #[test]
    fn unindexed_entries_leave_minimal_records() {
        let raws = extract_citations(DOC);
        let batch = &raws[..2];
        let response = r#"[{"authors": ["Nobody"], "year": 2000}]"#;
        let structured = parse_structure_response("p1", batch, response).unwrap();
        assert!(structured.iter().all(|c| c.authors.is_empty()));
        assert_eq!(structured[0].year, Some(2021), "year recovered from raw text");
    }

    #[test]
    fn garbage_response_is_a_parse_error() {
        let raws = extract_citations(DOC);
        assert!(parse_structure_response("p1", &raws[..1], "sorry, I cannot").is_err());
        assert!(parse_structure_response("p1", &raws[..1], "[{bad json").is_err());
    }

    #[test]
    fn reference_entries_come_from_the_references_section() {
        let entries = reference_entries(DOC);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].1.contains("Smith J"));
    }

    #[test]
    fn reference_entry_parsing_extracts_fields() {
        let entry = parse_reference_entry(
            "p1",
            "[1] Smith J. Deep parsing of citations. Journal X, 2021. 10.1000/jx.2021.42",
            0,
        );
        assert_eq!(entry.authors, vec!["Smith J"]);
        assert_eq!(entry.title.as_deref(), Some("Deep parsing of citations"));
        assert_eq!(entry.venue.as_deref(), Some("Journal X"));
        assert_eq!(entry.year, Some(2021));
        assert_eq!(entry.doi.as_deref(), Some("10.1000/jx.2021.42"));
    }

    #[test]
    fn rendered_bibliography_is_sorted_by_surname() {
        let zebra = parse_reference_entry("p", "Zebra Z. Last entry. Venue A, 2020.", 0);
        let abbot = parse_reference_entry("p", "Abbot A. First entry. Venue B, 2021.", 1);
        let bib = render_bibliography(CitationStyle::Apa, &[zebra, abbot]);
        assert!(bib.entries[0].starts_with("Abbot"));
        assert!(bib.entries[1].starts_with("Zebra"));
        assert!(bib.error.is_none());
    }

    #[test]
    fn every_style_renders_nonempty() {
        let entry = parse_reference_entry(
            "p1",
            "Smith J. Deep parsing of citations. Journal X, 2021.",
            0,
        );
        for style in CitationStyle::ALL {
            let line = render_entry(style, &entry, 1);
            assert!(line.contains("Smith"), "{style}: {line}");
            assert!(line.contains("2021"), "{style}: {line}");
        }
    }

    #[test]
    fn style_parsing_is_case_insensitive() {
        assert_eq!("apa".parse::<CitationStyle>().unwrap(), CitationStyle::Apa);
        assert_eq!("IEEE".parse::<CitationStyle>().unwrap(), CitationStyle::Ieee);
        assert!("vancouver".parse::<CitationStyle>().is_err());
    }

    #[test]
    fn requested_styles_default_and_dedup() {
        let input = TaskInput::from(json!({"citationStyles": "APA, apa, MLA"}));
        assert_eq!(
            requested_styles(&input).unwrap(),
            vec![CitationStyle::Apa, CitationStyle::Mla]
        );
        assert_eq!(requested_styles(&TaskInput::empty()).unwrap(), vec![CitationStyle::Apa]);
        let bad = TaskInput::from(json!({"citationStyles": "vancouver"}));
        assert!(requested_styles(&bad).is_err());
    }

    #[test]
    fn doi_scanner_requires_a_suffix() {
        assert_eq!(scan_doi("see 10.1000/abc.12,"), Some("10.1000/abc.12".into()));
        assert_eq!(scan_doi("measured at 10.5 degrees"), None);
        assert_eq!(scan_doi("https://doi.org/10.1234/x-9"), Some("10.1234/x-9".into()));
    }
}
