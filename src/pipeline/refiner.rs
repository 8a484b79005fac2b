use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{CallPolicy, EnhancedPrompt};
use crate::error::ProviderError;
use crate::llm::{GenerationRequest, LanguageModelClient};
use crate::prompts::REQUEST_REFINER_PROMPT;

const REFINER_MAX_OUTPUT: u32 = 600;
const REFINER_TEMPERATURE: f64 = 0.3;

/// Stage 1: rewrites the raw request into a retrieval-friendly analysis prompt.
#[derive(Clone)]
pub struct RequestRefiner {
    llm: Arc<dyn LanguageModelClient>,
    policy: CallPolicy,
}

impl RequestRefiner {
    /// Create a refiner that calls `llm` under `policy`.
    pub fn new(llm: Arc<dyn LanguageModelClient>, policy: CallPolicy) -> Self {
        Self { llm, policy }
    }

    /// Refine the request. Never fails: on any provider error the raw input
    /// comes back verbatim with `fallback` set.
    pub async fn refine(&self, raw_input: &str, excerpt: Option<&str>) -> EnhancedPrompt {
        let start = Instant::now();
        let request = GenerationRequest::new(
            REQUEST_REFINER_PROMPT,
            build_user_content(raw_input, excerpt),
        )
        .with_max_output(REFINER_MAX_OUTPUT)
        .with_temperature(REFINER_TEMPERATURE);

        let outcome = self
            .policy
            .call("refine", || self.llm.generate(request.clone()))
            .await
            .map_err(ProviderError::from)
            .and_then(|text| {
                let text = text.trim();
                if text.is_empty() {
                    Err(ProviderError::EmptyCompletion)
                } else {
                    Ok(text.to_string())
                }
            });

        match outcome {
            Ok(text) => {
                info!(
                    latency_ms = start.elapsed().as_millis(),
                    chars = text.len(),
                    "Request refined"
                );
                EnhancedPrompt::refined(text)
            }
            Err(e) => {
                warn!(error = %e, "Refinement failed, using raw input");
                EnhancedPrompt::passthrough(raw_input)
            }
        }
    }
}

fn build_user_content(raw_input: &str, excerpt: Option<&str>) -> String {
    match excerpt.map(str::trim).filter(|e| !e.is_empty()) {
        Some(excerpt) => {
            debug!(excerpt_chars = excerpt.len(), "Refining with highlighted excerpt");
            format!(
                "Request:\n{}\n\nHighlighted excerpt:\n\"\"\"\n{}\n\"\"\"",
                raw_input, excerpt
            )
        }
        None => format!("Request:\n{}", raw_input),
    }
}
