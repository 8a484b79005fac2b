use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{ExternalHit, ExternalReferenceSearch};
use crate::config::{RequestConfig, SearchEndpoint};
use crate::error::{RetrievalError, RetrievalResult};

#[derive(Debug, Deserialize)]
struct WebSearchResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    url: String,
    score: Option<f64>,
}

/// HTTP client for the public web search service.
#[derive(Clone)]
pub struct WebSearchClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl WebSearchClient {
    /// Create a new web search client
    pub fn new(endpoint: &SearchEndpoint, request_config: &RequestConfig) -> RetrievalResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(RetrievalError::Http)?;

        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            timeout_ms: request_config.timeout_ms,
        })
    }
}

/// Relevance for providers that only return an ordering.
fn rank_score(rank: usize) -> f64 {
    1.0 / (1.0 + rank as f64)
}

#[async_trait]
impl ExternalReferenceSearch for WebSearchClient {
    async fn search(&self, query: &str, top_n: usize) -> RetrievalResult<Vec<ExternalHit>> {
        let url = format!("{}/v1/web/search", self.base_url);
        let start = Instant::now();

        debug!(top_n, "Querying web search");

        let count = top_n.to_string();
        let mut builder = self
            .client
            .get(&url)
            .query(&[("q", query), ("count", count.as_str())]);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-Api-Key", key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                RetrievalError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: WebSearchResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::InvalidResponse {
                    message: format!("Failed to parse web search response: {}", e),
                })?;

        let hits: Vec<ExternalHit> = body
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(top_n)
            .enumerate()
            .map(|(rank, r)| ExternalHit {
                title: r.title,
                content: r.snippet,
                score: r.score.unwrap_or_else(|| rank_score(rank)),
                url: r.url,
            })
            .collect();

        info!(
            hits = hits.len(),
            latency_ms = start.elapsed().as_millis(),
            "Web search completed"
        );

        Ok(hits)
    }
}
