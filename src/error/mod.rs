use thiserror::Error;

use crate::pipeline::PipelineState;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// Language model provider failure.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Reference search failure.
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Cache backend failure.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Pipeline run failure.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Language model provider errors.
///
/// Always recovered inside the stage that made the call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Every retry failed.
    #[error("Provider unavailable: {message} (retries: {retries})")]
    Unavailable {
        /// Last error seen
        message: String,
        /// Retries made after the first attempt
        retries: u32,
    },

    /// Non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Body could not be parsed or reported failure.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Parse or provider detail
        message: String,
    },

    /// Completion was blank.
    #[error("Provider returned an empty completion")]
    EmptyCompletion,

    /// Call exceeded its deadline.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Reference search errors, scoped to a single retrieval branch.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Non-success HTTP status.
    #[error("Search API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Body did not match the expected shape.
    #[error("Invalid search response: {message}")]
    InvalidResponse {
        /// Parse detail
        message: String,
    },

    /// Search exceeded its deadline.
    #[error("Search timeout after {timeout_ms}ms")]
    Timeout {
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// The branch panicked or was aborted.
    #[error("Search branch aborted: {message}")]
    Branch {
        /// Panic payload or abort reason
        message: String,
    },

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Cache backend errors. Degrade to "cache disabled", never fatal.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend could not be opened.
    #[error("Cache connection failed: {message}")]
    Connection {
        /// Underlying failure
        message: String,
    },

    /// Schema migration failed.
    #[error("Cache migration failed: {message}")]
    Migration {
        /// Underlying failure
        message: String,
    },

    /// Stored value could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database query failed.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors surfaced to the caller of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request rejected before any stage ran.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Why it was rejected
        message: String,
    },

    /// Run observed its cancellation flag.
    #[error("Run cancelled while {state}")]
    Cancelled {
        /// State the run was in
        state: PipelineState,
    },

    /// Unrecoverable fault inside a stage.
    #[error("Pipeline failed while {state}: {message}")]
    Stage {
        /// State the run was in
        state: PipelineState,
        /// Fault detail
        message: String,
    },
}

impl PipelineError {
    /// State the pipeline was in when the error occurred, if any.
    pub fn state(&self) -> Option<PipelineState> {
        match self {
            PipelineError::InvalidInput { .. } => None,
            PipelineError::Cancelled { state } | PipelineError::Stage { state, .. } => Some(*state),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for language model calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for reference searches
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for pipeline runs
pub type PipelineResult<T> = Result<T, PipelineError>;
