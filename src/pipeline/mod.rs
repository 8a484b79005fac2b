//! The four-stage analysis pipeline.
//!
//! - [`RequestRefiner`]: raw input (+ excerpt) → enhanced prompt
//! - [`QueryPlanner`]: enhanced prompt → internal and external queries
//! - [`ReferenceAggregator`]: both searches concurrently, failures isolated per branch
//! - [`Synthesizer`]: one model call over the prompt and both reference lists
//!
//! [`AnalysisOrchestrator`] sequences the stages, consults the
//! [`AnalysisCache`](crate::cache::AnalysisCache), reports progress and owns
//! the per-call timeout/retry policy. Every stage substitutes a fallback on
//! failure, so a run only errors on cancellation or an unexpected panic.

mod aggregator;
mod orchestrator;
mod planner;
mod policy;
mod progress;
mod refiner;
mod synthesizer;
mod types;

pub use aggregator::*;
pub use orchestrator::*;
pub use planner::*;
pub use policy::*;
pub use progress::*;
pub use refiner::*;
pub use synthesizer::*;
pub use types::*;
