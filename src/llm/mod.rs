//! Language model abstraction used by the refinement, planning and synthesis stages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// A single generation call: one system instruction, one user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Fixed instruction describing the task.
    pub system_instruction: String,
    /// Request-specific content.
    pub user_content: String,
    /// Upper bound on generated tokens.
    pub max_output: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

impl GenerationRequest {
    /// Create a request with the given instruction and content.
    pub fn new(system_instruction: impl Into<String>, user_content: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            user_content: user_content.into(),
            max_output: 1000,
            temperature: 0.7,
        }
    }

    /// Set the output token limit.
    pub fn with_max_output(mut self, max_output: u32) -> Self {
        self.max_output = max_output;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }
}

/// Sends a structured prompt to an LLM provider and returns the generated text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModelClient: Send + Sync {
    /// Generate text for the request.
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<String>;
}
