//! Agent tasks, their weakly-typed input trees, and invocation results.

use crate::error::AgentError;
use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The closed set of agent kinds, used for registry lookup and fallback
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    PaperProcessor,
    MetadataEnhancer,
    ContentSummarizer,
    ConceptExplainer,
    CitationFormatter,
    QualityChecker,
    PerplexityResearcher,
    RelatedPaperDiscovery,
}

impl AgentKind {
    pub const ALL: [AgentKind; 8] = [
        AgentKind::PaperProcessor,
        AgentKind::MetadataEnhancer,
        AgentKind::ContentSummarizer,
        AgentKind::ConceptExplainer,
        AgentKind::CitationFormatter,
        AgentKind::QualityChecker,
        AgentKind::PerplexityResearcher,
        AgentKind::RelatedPaperDiscovery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::PaperProcessor => "paper_processor",
            AgentKind::MetadataEnhancer => "metadata_enhancer",
            AgentKind::ContentSummarizer => "content_summarizer",
            AgentKind::ConceptExplainer => "concept_explainer",
            AgentKind::CitationFormatter => "citation_formatter",
            AgentKind::QualityChecker => "quality_checker",
            AgentKind::PerplexityResearcher => "perplexity_researcher",
            AgentKind::RelatedPaperDiscovery => "related_paper_discovery",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| AgentError::InvalidInput(format!("unknown agent kind `{s}`")))
    }
}

/// The weakly-typed input tree a task arrives with.
///
/// Agents read it through these accessors instead of forcing a rigid schema:
/// required string, optional scalar with lenient coercion, string list
/// accepting either a JSON array or a comma-separated string. Unknown keys
/// are simply never read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskInput {
    root: Value,
}

impl From<Value> for TaskInput {
    fn from(root: Value) -> Self {
        Self { root }
    }
}

impl TaskInput {
    pub fn empty() -> Self {
        Self { root: Value::Object(Default::default()) }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_null())
    }

    /// Required string field; missing or non-string is a non-retryable input
    /// error with the field named.
    pub fn require_str(&self, key: &str) -> Result<&str, AgentError> {
        self.opt_str(key)
            .ok_or_else(|| AgentError::InvalidInput(format!("missing required field `{key}`")))
    }

    /// First present field among alternatives; all absent is a non-retryable
    /// input error naming every alternative.
    pub fn require_any_str(&self, keys: &[&str]) -> Result<&str, AgentError> {
        keys.iter().find_map(|k| self.opt_str(k)).ok_or_else(|| {
            AgentError::InvalidInput(format!(
                "missing required field (one of `{}`)",
                keys.join("`, `")
            ))
        })
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Lenient boolean: accepts a JSON bool or the strings "true"/"false".
    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Lenient unsigned integer: accepts a JSON number or a numeric string.
    pub fn opt_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn opt_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String list accepting either a JSON array of strings or one
    /// comma-separated string. Blank entries are dropped.
    pub fn str_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Optional enum field parsed via `FromStr`; a present-but-invalid value
    /// is an input error, absence is fine.
    pub fn opt_enum<T>(&self, key: &str) -> Result<Option<T>, AgentError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.opt_str(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                AgentError::InvalidInput(format!("invalid value `{raw}` for `{key}`: {e}"))
            }),
        }
    }
}

/// A unit of work for one agent. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub kind: AgentKind,
    pub input: TaskInput,
    pub created_at_millis: u64,
}

impl AgentTask {
    pub fn new(id: impl Into<String>, kind: AgentKind, input: Value) -> Self {
        let created_at_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self { id: id.into(), kind, input: TaskInput::from(input), created_at_millis }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    SuccessViaFallback,
}

impl Outcome {
    /// Downstream consumers treat a fallback success exactly like a success;
    /// the difference lives only in the metrics.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::SuccessViaFallback)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub started_at_millis: u64,
    pub duration: Duration,
    pub provider: Option<Provider>,
    pub attempts: usize,
    pub fallback_used: bool,
    pub primary_failure: Option<String>,
}

/// The outcome of one agent invocation. Immutable.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub task_id: String,
    pub outcome: Outcome,
    pub data: Value,
    pub error: Option<String>,
    pub metrics: TaskMetrics,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_kind_names_round_trip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.name().parse::<AgentKind>().unwrap(), kind);
        }
        assert!("pdf_mangler".parse::<AgentKind>().is_err());
    }

    #[test]
    fn require_str_names_the_missing_field() {
        let input = TaskInput::empty();
        let err = input.require_str("paperId").unwrap_err();
        assert!(err.is_invalid_input());
        assert!(err.to_string().contains("paperId"));
    }

    #[test]
    fn require_any_str_takes_the_first_present() {
        let input = TaskInput::from(json!({"textContent": "body"}));
        assert_eq!(input.require_any_str(&["rawContent", "textContent"]).unwrap(), "body");

        let err = TaskInput::empty().require_any_str(&["rawContent", "textContent"]).unwrap_err();
        assert!(err.to_string().contains("rawContent"));
        assert!(err.to_string().contains("textContent"));
    }

    #[test]
    fn str_list_accepts_array_or_comma_list() {
        let array = TaskInput::from(json!({"citationStyles": ["APA", "MLA"]}));
        assert_eq!(array.str_list("citationStyles"), vec!["APA", "MLA"]);

        let comma = TaskInput::from(json!({"citationStyles": "APA, MLA , ,IEEE"}));
        assert_eq!(comma.str_list("citationStyles"), vec!["APA", "MLA", "IEEE"]);

        assert!(TaskInput::empty().str_list("citationStyles").is_empty());
    }

    #[test]
    fn scalars_coerce_from_strings() {
        let input = TaskInput::from(json!({
            "verifyFacts": "true",
            "maxTotalPapers": "25",
            "minimumRelevanceScore": "0.4",
            "parallelExecution": false,
        }));
        assert_eq!(input.opt_bool("verifyFacts"), Some(true));
        assert_eq!(input.opt_bool("parallelExecution"), Some(false));
        assert_eq!(input.opt_u64("maxTotalPapers"), Some(25));
        assert_eq!(input.opt_f64("minimumRelevanceScore"), Some(0.4));
    }

    #[test]
    fn blank_strings_are_treated_as_absent() {
        let input = TaskInput::from(json!({"paperId": "   "}));
        assert!(input.opt_str("paperId").is_none());
        assert!(input.require_str("paperId").is_err());
    }

    #[test]
    fn opt_enum_rejects_bad_values_but_allows_absence() {
        let ok = TaskInput::from(json!({"kind": "quality_checker"}));
        let parsed: Option<AgentKind> = ok.opt_enum("kind").unwrap();
        assert_eq!(parsed, Some(AgentKind::QualityChecker));

        let absent: Option<AgentKind> = TaskInput::empty().opt_enum("kind").unwrap();
        assert!(absent.is_none());

        let bad = TaskInput::from(json!({"kind": "nonsense"}));
        assert!(bad.opt_enum::<AgentKind>("kind").is_err());
    }

    #[test]
    fn fallback_success_counts_as_success() {
        assert!(Outcome::Success.is_success());
        assert!(Outcome::SuccessViaFallback.is_success());
        assert!(!Outcome::Failure.is_success());
    }

    #[test]
    fn outcome_serialises_with_documented_names() {
        assert_eq!(serde_json::to_string(&Outcome::SuccessViaFallback).unwrap(), "\"success_via_fallback\"");
    }
}
