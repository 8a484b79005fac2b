//! Reference search collaborators.
//!
//! Two heterogeneous stores are queried: an organizational document index
//! ([`InternalReferenceSearch`]) and a public web search service
//! ([`ExternalReferenceSearch`]). Their hit types are kept distinct so a
//! result can only become a [`Reference`](crate::pipeline::Reference) of the
//! matching origin.

mod document_index;
mod web;

pub use document_index::DocumentIndexClient;
pub use web::WebSearchClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalResult;

/// One snippet from the internal document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalHit {
    /// Document title.
    pub title: String,
    /// Matching passage.
    pub content: String,
    /// Index-native relevance, normalized later.
    pub score: f64,
    /// Document path, collection or other locator inside the index.
    pub source_detail: String,
}

/// One snippet from the public web.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalHit {
    /// Page title.
    pub title: String,
    /// Result snippet.
    pub content: String,
    /// Provider relevance, normalized later.
    pub score: f64,
    /// Page address.
    pub url: String,
}

/// Queries an organizational document index.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InternalReferenceSearch: Send + Sync {
    /// Return up to `top_n` ranked hits for the query.
    async fn search(&self, query: &str, top_n: usize) -> RetrievalResult<Vec<InternalHit>>;
}

/// Queries a public web search provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalReferenceSearch: Send + Sync {
    /// Return up to `top_n` ranked hits for the query.
    async fn search(&self, query: &str, top_n: usize) -> RetrievalResult<Vec<ExternalHit>>;
}

/// Map a provider score into `[0, 1]`; NaN counts as irrelevant.
pub fn normalize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
