//! # Grounded Analysis
//!
//! A retrieval-augmented analysis pipeline. It turns a raw user request (plus
//! an optional highlighted excerpt) into a source-grounded analysis by
//! orchestrating a language model and two reference stores: an internal
//! document index and a public web search service.
//!
//! ## Pipeline
//!
//! ```text
//! request ─▶ RequestRefiner ─▶ QueryPlanner ─┬▶ internal search ─┬▶ Synthesizer ─▶ AnalysisResult
//!                                            └▶ external search ─┘
//!                  ▲                                                     │
//!                  └──────────────── AnalysisCache (TTL) ◀───────────────┘
//! ```
//!
//! Every stage substitutes a deterministic fallback on failure, so a run
//! always yields non-empty content unless it is cancelled or something
//! panics.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use grounded_analysis::{AnalysisOrchestrator, Config, PipelineSettings};
//! use grounded_analysis::cache::MemoryCache;
//! use grounded_analysis::langbase::{LangbaseClient, LangbaseModel};
//! use grounded_analysis::pipeline::NoopObserver;
//! use grounded_analysis::search::{DocumentIndexClient, WebSearchClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let orchestrator = AnalysisOrchestrator::new(
//!         Arc::new(LangbaseModel::new(client, &config.pipes.analysis)),
//!         Arc::new(DocumentIndexClient::new(&config.search.internal, &config.request)?),
//!         Arc::new(WebSearchClient::new(&config.search.external, &config.request)?),
//!         Arc::new(MemoryCache::new()),
//!         PipelineSettings::from_config(&config),
//!     );
//!     let result = orchestrator
//!         .run("Summarize adoption trends for AI writing tools", None, &NoopObserver)
//!         .await?;
//!     println!("{}", result.content);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Content-addressed, TTL-bounded cache of pipeline outputs.
pub mod cache;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client, the default language model provider.
pub mod langbase;
/// Language model client abstraction.
pub mod llm;
/// Pipeline stages, data model and orchestrator.
pub mod pipeline;
/// System instructions for the pipeline's model calls.
pub mod prompts;
/// Internal and external reference search.
pub mod search;

pub use config::Config;
pub use error::{AppError, AppResult, PipelineError, PipelineResult};
pub use pipeline::{AnalysisOrchestrator, AnalysisResult, PipelineSettings, ProgressEvent};
