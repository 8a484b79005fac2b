use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::search::{normalize_score, ExternalHit, InternalHit};

/// Stable SHA-256 digest of the logical request.
///
/// Fields are length-prefixed and the excerpt carries a presence tag, so
/// moving characters between the two inputs or passing `Some("")` instead of
/// `None` yields a different key.
pub fn request_hash(raw_input: &str, excerpt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update((raw_input.len() as u64).to_le_bytes());
    hasher.update(raw_input.as_bytes());
    match excerpt {
        Some(excerpt) => {
            hasher.update([1u8]);
            hasher.update((excerpt.len() as u64).to_le_bytes());
            hasher.update(excerpt.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    format!("{:x}", hasher.finalize())
}

/// One user-initiated analysis request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    raw_input: String,
    excerpt: Option<String>,
    request_hash: String,
}

impl AnalysisRequest {
    /// Create a request and compute its content hash.
    pub fn new(raw_input: impl Into<String>, excerpt: Option<String>) -> Self {
        let raw_input = raw_input.into();
        let request_hash = request_hash(&raw_input, excerpt.as_deref());
        Self {
            raw_input,
            excerpt,
            request_hash,
        }
    }

    /// The user's request as typed.
    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    /// The highlighted excerpt, if any.
    pub fn excerpt(&self) -> Option<&str> {
        self.excerpt.as_deref()
    }

    /// Hex digest of (raw_input, excerpt).
    pub fn request_hash(&self) -> &str {
        &self.request_hash
    }
}

/// Retrieval-friendly rewrite of the raw request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedPrompt {
    /// Prompt text handed to the planner and synthesizer.
    pub text: String,
    /// True when refinement failed and `text` is the raw input verbatim.
    pub fallback: bool,
}

impl EnhancedPrompt {
    /// A successfully refined prompt.
    pub fn refined(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fallback: false,
        }
    }

    /// The raw input passed through unchanged.
    pub fn passthrough(raw_input: impl Into<String>) -> Self {
        Self {
            text: raw_input.into(),
            fallback: true,
        }
    }
}

/// Store-specific queries derived from the enhanced prompt. Both always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// Query sent to the document index.
    pub internal_query: String,
    /// Query sent to web search.
    pub external_query: String,
}

/// Which reference store produced a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// The organization's document index.
    Internal,
    /// Public web search.
    External,
}

impl Origin {
    /// Lowercase name for logs and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Internal => "internal",
            Origin::External => "external",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A retrieved snippet used as grounding context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Document or page title.
    pub title: String,
    /// Snippet text.
    pub content: String,
    /// Index locator for internal references, URL for external ones.
    pub source_or_url: String,
    /// Relevance in `[0, 1]`.
    pub relevance_score: f64,
    /// Store the reference came from.
    pub origin: Origin,
}

impl From<InternalHit> for Reference {
    fn from(hit: InternalHit) -> Self {
        Self {
            title: hit.title,
            content: hit.content,
            source_or_url: hit.source_detail,
            relevance_score: normalize_score(hit.score),
            origin: Origin::Internal,
        }
    }
}

impl From<ExternalHit> for Reference {
    fn from(hit: ExternalHit) -> Self {
        Self {
            title: hit.title,
            content: hit.content,
            source_or_url: hit.url,
            relevance_score: normalize_score(hit.score),
            origin: Origin::External,
        }
    }
}

/// A stage that substituted its fallback during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Refinement failed; the raw input was used as the enhanced prompt.
    RefinerFallback,
    /// A planner slot was unusable and fell back to the enhanced prompt.
    PlannerFallback {
        /// Store whose query fell back.
        slot: Origin,
    },
    /// A retrieval branch failed and contributed no references.
    RetrievalFailed {
        /// Store that failed.
        origin: Origin,
    },
    /// Synthesis failed; the content is the deterministic template.
    SynthesisFallback,
}

/// Terminal artifact of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Hash of the request that produced this result.
    pub request_hash: String,
    /// Final analysis text; never empty.
    pub content: String,
    /// Internal references, best first, at most `top_n`.
    pub internal_refs: Vec<Reference>,
    /// External references, best first, at most `top_n`.
    pub external_refs: Vec<Reference>,
    /// Prompt the analysis was synthesized from.
    pub enhanced_prompt: String,
    /// When synthesis finished.
    pub generated_at: DateTime<Utc>,
    /// Fallbacks taken during the run; empty for a complete result.
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}

impl AnalysisResult {
    /// Whether any stage used its fallback.
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Identifier of one orchestrator run, used for cancellation and progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Allocate a fresh run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_hash_is_stable() {
        let a = request_hash("Summarize adoption trends", Some("excerpt"));
        let b = request_hash("Summarize adoption trends", Some("excerpt"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_request_hash_differs_by_one_character() {
        let base = request_hash("Summarize adoption trends", Some("excerpt"));
        assert_ne!(base, request_hash("Summarize adoption trendz", Some("excerpt")));
        assert_ne!(base, request_hash("Summarize adoption trends", Some("excerpT")));
    }

    #[test]
    fn test_request_hash_field_boundaries() {
        assert_ne!(request_hash("ab", None), request_hash("a", Some("b")));
        assert_ne!(request_hash("ab", None), request_hash("ab", Some("")));
    }

    #[test]
    fn test_analysis_request_accessors() {
        let request = AnalysisRequest::new("question", Some("context".to_string()));
        assert_eq!(request.raw_input(), "question");
        assert_eq!(request.excerpt(), Some("context"));
        assert_eq!(request.request_hash(), request_hash("question", Some("context")));
    }

    #[test]
    fn test_reference_from_hits_tags_origin_and_clamps() {
        let internal: Reference = InternalHit {
            title: "Q3 memo".to_string(),
            content: "adoption grew".to_string(),
            score: 1.4,
            source_detail: "memos/q3.md".to_string(),
        }
        .into();
        assert_eq!(internal.origin, Origin::Internal);
        assert_eq!(internal.relevance_score, 1.0);
        assert_eq!(internal.source_or_url, "memos/q3.md");

        let external: Reference = ExternalHit {
            title: "Survey".to_string(),
            content: "usage doubled".to_string(),
            score: 0.3,
            url: "https://example.com/survey".to_string(),
        }
        .into();
        assert_eq!(external.origin, Origin::External);
        assert_eq!(external.source_or_url, "https://example.com/survey");
    }

    #[test]
    fn test_enhanced_prompt_constructors() {
        assert!(!EnhancedPrompt::refined("x").fallback);
        let passthrough = EnhancedPrompt::passthrough("raw");
        assert!(passthrough.fallback);
        assert_eq!(passthrough.text, "raw");
    }

    #[test]
    fn test_degradation_serialization() {
        let value = serde_json::to_value(Degradation::RetrievalFailed {
            origin: Origin::External,
        })
        .unwrap();
        assert_eq!(value["kind"], "retrieval_failed");
        assert_eq!(value["origin"], "external");
    }
}
