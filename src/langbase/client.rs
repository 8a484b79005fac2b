use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, Message, PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::llm::{GenerationRequest, LanguageModelClient};
use crate::prompts::ANALYSIS_PIPE_PROMPT;

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Call a Langbase pipe with the given request
    pub async fn call_pipe(&self, request: PipeRequest) -> ProviderResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = request.name.clone();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    pipe = %pipe_name,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                // Client errors other than rate limiting won't improve on retry
                Err(ProviderError::Api { status, message })
                    if (400..500).contains(&status) && status != 429 =>
                {
                    error!(pipe = %pipe_name, status, "Langbase rejected request");
                    return Err(ProviderError::Api { status, message });
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(ProviderError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &PipeRequest,
    ) -> ProviderResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        Ok(pipe_response)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> ProviderResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: CreatePipeResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    message: format!("Failed to parse create pipe response: {}", e),
                })?;

        info!(
            pipe = %pipe_response.name,
            url = %pipe_response.url,
            "Pipe created successfully"
        );

        Ok(pipe_response)
    }

    /// Ensure the analysis pipe exists, creating it if needed
    pub async fn ensure_analysis_pipe(&self, pipe_name: &str) -> ProviderResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description("Retrieval-grounded analysis pipeline")
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_store(false)
            .with_temperature(0.4)
            .with_max_tokens(2000)
            .with_messages(vec![Message::system(ANALYSIS_PIPE_PROMPT)]);

        match self.create_pipe(request).await {
            Ok(_) => {
                info!(pipe = %pipe_name, "Analysis pipe ready");
                Ok(())
            }
            Err(ProviderError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// [`LanguageModelClient`] backed by a single Langbase pipe.
///
/// Each generation sends the stage instruction as a system message, so one
/// pipe serves the refiner, planner and synthesizer alike.
#[derive(Clone)]
pub struct LangbaseModel {
    client: LangbaseClient,
    pipe_name: String,
}

impl LangbaseModel {
    /// Wrap a client and the pipe it should run.
    pub fn new(client: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    /// The pipe this model runs.
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    fn build_request(&self, request: GenerationRequest) -> PipeRequest {
        PipeRequest::new(
            &self.pipe_name,
            vec![
                Message::system(request.system_instruction),
                Message::user(request.user_content),
            ],
        )
        .with_max_tokens(request.max_output)
        .with_temperature(request.temperature)
    }
}

#[async_trait]
impl LanguageModelClient for LangbaseModel {
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<String> {
        let response = self.client.call_pipe(self.build_request(request)).await?;

        if !response.success {
            return Err(ProviderError::InvalidResponse {
                message: "Pipe run reported success=false".to_string(),
            });
        }
        if response.completion.trim().is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }

        Ok(response.completion)
    }
}
