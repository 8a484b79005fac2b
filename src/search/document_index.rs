use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{InternalHit, InternalReferenceSearch};
use crate::config::{RequestConfig, SearchEndpoint};
use crate::error::{RetrievalError, RetrievalResult};

#[derive(Debug, Serialize)]
struct IndexSearchRequest<'a> {
    query: &'a str,
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct IndexSearchResponse {
    #[serde(default)]
    results: Vec<IndexDocument>,
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    source: String,
}

/// HTTP client for the organizational document index.
#[derive(Clone)]
pub struct DocumentIndexClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl DocumentIndexClient {
    /// Create a new document index client
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

#[async_trait]
impl InternalReferenceSearch for DocumentIndexClient {
    async fn search(&self, query: &str, top_n: usize) -> RetrievalResult<Vec<InternalHit>> {
        let url = format!("{}/v1/search", self.base_url);
        let start = Instant::now();

        debug!(top_n, "Querying document index");

        let mut builder = self
            .client
            .post(&url)
            .json(&IndexSearchRequest { query, top_n });
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
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

        let body: IndexSearchResponse =
            response
                .json()
                .await
                .map_err(|e| RetrievalError::InvalidResponse {
                    message: format!("Failed to parse index response: {}", e),
                })?;

        let hits: Vec<InternalHit> = body
            .results
            .into_iter()
            .filter(|doc| !doc.content.trim().is_empty())
            .take(top_n)
            .map(|doc| InternalHit {
                title: doc.title,
                content: doc.content,
                score: doc.score,
                source_detail: doc.source,
            })
            .collect();

        info!(
            hits = hits.len(),
            latency_ms = start.elapsed().as_millis(),
            "Document index search completed"
        );

        Ok(hits)
    }
}
