use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{
    AnalysisRequest, AnalysisResult, CallPolicy, Degradation, EnhancedPrompt, PipelineState,
    ProgressEvent, ProgressObserver, QueryPlanner, ReferenceAggregator, RequestRefiner, RunId,
    Synthesizer,
};
use crate::cache::{AnalysisCache, CacheKey, CachedValue};
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::LanguageModelClient;
use crate::search::{ExternalReferenceSearch, InternalReferenceSearch};

/// Bounds and policies for one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Maximum references kept per origin.
    pub top_n: usize,
    /// References per origin rendered into the synthesis context.
    pub synthesis_refs_per_origin: usize,
    /// Character cap for each rendered reference.
    pub reference_char_limit: usize,
    /// Policy for language model calls.
    pub llm_policy: CallPolicy,
    /// Policy for each search branch.
    pub search_policy: CallPolicy,
    /// Lifetime of cached results and intermediates.
    pub cache_ttl: Duration,
    /// Lifetime of cached results produced with a fallback.
    pub degraded_cache_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_n: 5,
            synthesis_refs_per_origin: 3,
            reference_char_limit: 600,
            llm_policy: CallPolicy {
                timeout: Duration::from_secs(45),
                max_attempts: 2,
                backoff: Duration::from_millis(500),
            },
            search_policy: CallPolicy {
                timeout: Duration::from_secs(15),
                max_attempts: 2,
                backoff: Duration::from_millis(500),
            },
            cache_ttl: Duration::from_secs(3600),
            degraded_cache_ttl: Duration::from_secs(60),
        }
    }
}

impl PipelineSettings {
    /// Build settings from application configuration.
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        let backoff = Duration::from_millis(pipeline.backoff_ms);

        Self {
            top_n: pipeline.top_n,
            synthesis_refs_per_origin: pipeline.synthesis_refs_per_origin,
            reference_char_limit: pipeline.reference_char_limit,
            llm_policy: CallPolicy {
                timeout: Duration::from_millis(pipeline.llm_timeout_ms),
                max_attempts: pipeline.max_attempts,
                backoff,
            },
            search_policy: CallPolicy {
                timeout: Duration::from_millis(pipeline.search_timeout_ms),
                max_attempts: pipeline.max_attempts,
                backoff,
            },
            cache_ttl: Duration::from_secs(config.cache.ttl_secs),
            degraded_cache_ttl: Duration::from_secs(config.cache.degraded_ttl_secs),
        }
    }
}

/// State owned by a single run and threaded through its stages.
struct RunContext<'a> {
    run_id: RunId,
    request: AnalysisRequest,
    state: PipelineState,
    cancelled: Arc<AtomicBool>,
    observer: &'a dyn ProgressObserver,
    cache_enabled: bool,
    degradations: Vec<Degradation>,
}

impl RunContext<'_> {
    /// Enter `state` and notify the observer. A panicking observer fails
    /// the run in that state.
    fn transition(&mut self, state: PipelineState, message: &str) -> PipelineResult<()> {
        debug!(run_id = %self.run_id, from = %self.state, to = %state, "Pipeline transition");
        self.state = state;
        let event = ProgressEvent::new(self.run_id, state, message);
        let observer = self.observer;
        std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(&event))).map_err(
            |panic| PipelineError::Stage {
                state,
                message: format!("progress observer panicked: {}", panic_message(panic.as_ref())),
            },
        )
    }

    /// Check for cancellation, then enter `state`.
    fn advance(&mut self, state: PipelineState, message: &str) -> PipelineResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled { state: self.state });
        }
        self.transition(state, message)
    }
}

/// Removes a run from the active set however the run future ends.
struct ActiveRun<'a> {
    runs: &'a DashMap<RunId, Arc<AtomicBool>>,
    run_id: RunId,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.run_id);
    }
}

/// Sequences the pipeline stages for each request.
///
/// The cache is the only state shared between concurrent runs. Two runs for
/// the same request may both execute in full; that is redundant, not wrong.
pub struct AnalysisOrchestrator {
    refiner: RequestRefiner,
    planner: QueryPlanner,
    aggregator: ReferenceAggregator,
    synthesizer: Synthesizer,
    cache: Arc<dyn AnalysisCache>,
    settings: PipelineSettings,
    active_runs: DashMap<RunId, Arc<AtomicBool>>,
}

impl AnalysisOrchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        llm: Arc<dyn LanguageModelClient>,
        internal: Arc<dyn InternalReferenceSearch>,
        external: Arc<dyn ExternalReferenceSearch>,
        cache: Arc<dyn AnalysisCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            refiner: RequestRefiner::new(Arc::clone(&llm), settings.llm_policy),
            planner: QueryPlanner::new(Arc::clone(&llm), settings.llm_policy),
            aggregator: ReferenceAggregator::new(
                internal,
                external,
                settings.search_policy,
                settings.top_n,
            ),
            synthesizer: Synthesizer::new(
                llm,
                settings.llm_policy,
                settings.synthesis_refs_per_origin,
                settings.reference_char_limit,
            ),
            cache,
            settings,
            active_runs: DashMap::new(),
        }
    }

    /// Settings this orchestrator was built with.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Number of runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.active_runs.len()
    }

    /// Run the pipeline under a fresh run id.
    pub async fn run(
        &self,
        raw_input: &str,
        excerpt: Option<&str>,
        observer: &dyn ProgressObserver,
    ) -> PipelineResult<AnalysisResult> {
        self.run_with_id(RunId::new(), raw_input, excerpt, observer)
            .await
    }

    /// Run the pipeline under a caller-chosen id, so it can be cancelled.
    pub async fn run_with_id(
        &self,
        run_id: RunId,
        raw_input: &str,
        excerpt: Option<&str>,
        observer: &dyn ProgressObserver,
    ) -> PipelineResult<AnalysisResult> {
        if raw_input.trim().is_empty() {
            return Err(PipelineError::InvalidInput {
                message: "raw_input cannot be empty".to_string(),
            });
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        match self.active_runs.entry(run_id) {
            Entry::Occupied(_) => {
                warn!(run_id = %run_id, "Rejected run, id already active");
                return Err(PipelineError::InvalidInput {
                    message: format!("run {} is already active", run_id),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cancelled));
            }
        }
        let _active = ActiveRun {
            runs: &self.active_runs,
            run_id,
        };

        let mut ctx = RunContext {
            run_id,
            request: AnalysisRequest::new(raw_input, excerpt.map(str::to_string)),
            state: PipelineState::Initialized,
            cancelled,
            observer,
            cache_enabled: true,
            degradations: Vec::new(),
        };

        let start = Instant::now();
        info!(
            run_id = %run_id,
            request_hash = %ctx.request.request_hash(),
            "Analysis run started"
        );

        match self.execute(&mut ctx).await {
            Ok(result) => {
                info!(
                    run_id = %run_id,
                    degraded = result.is_degraded(),
                    latency_ms = start.elapsed().as_millis(),
                    "Analysis run completed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Analysis run failed");
                if let Err(notify) = ctx.transition(PipelineState::Error, &e.to_string()) {
                    warn!(run_id = %run_id, error = %notify, "Error event not delivered");
                }
                Err(e)
            }
        }
    }

    /// Request cancellation of a run. Takes effect at the next stage
    /// transition; unknown or finished runs are ignored.
    pub fn cancel(&self, run_id: &RunId) {
        match self.active_runs.get(run_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(run_id = %run_id, "Cancellation requested");
            }
            None => debug!(run_id = %run_id, "Cancel ignored, run not active"),
        }
    }

    async fn execute(&self, ctx: &mut RunContext<'_>) -> PipelineResult<AnalysisResult> {
        ctx.transition(PipelineState::Initialized, "Run initialized")?;

        let analysis_key = CacheKey::analysis(ctx.request.request_hash());
        let cached = guarded(ctx.state, self.cache_get(ctx, &analysis_key)).await?;
        if let Some(CachedValue::Analysis(result)) = cached {
            info!(run_id = %ctx.run_id, "Serving analysis from cache");
            ctx.transition(PipelineState::Done, "Analysis served from cache")?;
            return Ok(*result);
        }

        ctx.advance(PipelineState::Refining, "Refining request")?;
        let enhanced = guarded(ctx.state, self.refine_stage(ctx)).await?;

        ctx.advance(PipelineState::Planning, "Planning retrieval queries")?;
        let plan = guarded(ctx.state, self.planner.plan(&enhanced.text)).await?;
        ctx.degradations.extend(
            plan.fallback_slots
                .iter()
                .map(|slot| Degradation::PlannerFallback { slot: *slot }),
        );

        ctx.advance(PipelineState::Retrieving, "Searching internal and external references")?;
        let refs = guarded(ctx.state, self.aggregator.search(&plan.query)).await?;
        ctx.degradations.extend(
            refs.failed_origins
                .iter()
                .map(|origin| Degradation::RetrievalFailed { origin: *origin }),
        );

        ctx.advance(PipelineState::Synthesizing, "Synthesizing analysis")?;
        let synthesis = guarded(
            ctx.state,
            self.synthesizer.synthesize(
                &enhanced.text,
                &refs.internal_refs,
                &refs.external_refs,
                ctx.request.raw_input(),
            ),
        )
        .await?;
        if synthesis.fallback {
            ctx.degradations.push(Degradation::SynthesisFallback);
        }

        let result = AnalysisResult {
            request_hash: ctx.request.request_hash().to_string(),
            content: synthesis.content,
            internal_refs: refs.internal_refs,
            external_refs: refs.external_refs,
            enhanced_prompt: enhanced.text,
            generated_at: Utc::now(),
            degradations: std::mem::take(&mut ctx.degradations),
        };

        if ctx.cancelled.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled { state: ctx.state });
        }

        let ttl = if result.is_degraded() {
            self.settings.degraded_cache_ttl
        } else {
            self.settings.cache_ttl
        };
        guarded(
            ctx.state,
            self.cache_put(
                ctx,
                &analysis_key,
                CachedValue::Analysis(Box::new(result.clone())),
                ttl,
            ),
        )
        .await?;

        ctx.transition(PipelineState::Done, "Analysis complete")?;
        Ok(result)
    }

    /// Stage 1, reusing a cached refinement when one is live.
    async fn refine_stage(&self, ctx: &mut RunContext<'_>) -> EnhancedPrompt {
        let key = CacheKey::enhanced_prompt(ctx.request.request_hash());

        let cached = self.cache_get(ctx, &key).await;
        if let Some(CachedValue::EnhancedPrompt(prompt)) = cached {
            debug!(run_id = %ctx.run_id, "Reusing cached enhanced prompt");
            return prompt;
        }

        let prompt = self
            .refiner
            .refine(ctx.request.raw_input(), ctx.request.excerpt())
            .await;

        if prompt.fallback {
            ctx.degradations.push(Degradation::RefinerFallback);
        } else {
            let ttl = self.settings.cache_ttl;
            self.cache_put(ctx, &key, CachedValue::EnhancedPrompt(prompt.clone()), ttl)
                .await;
        }

        prompt
    }

    /// Cache lookup; a backend error disables the cache for the rest of the run.
    async fn cache_get(&self, ctx: &mut RunContext<'_>, key: &CacheKey) -> Option<CachedValue> {
        if !ctx.cache_enabled {
            return None;
        }

        match self.cache.get(key).await {
            Ok(value) => {
                debug!(run_id = %ctx.run_id, key = %key, hit = value.is_some(), "Cache lookup");
                value
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "Cache lookup failed, disabling cache for this run");
                ctx.cache_enabled = false;
                None
            }
        }
    }

    async fn cache_put(
        &self,
        ctx: &mut RunContext<'_>,
        key: &CacheKey,
        value: CachedValue,
        ttl: Duration,
    ) {
        if !ctx.cache_enabled {
            return;
        }

        if let Err(e) = self.cache.put(key, value, ttl).await {
            warn!(run_id = %ctx.run_id, error = %e, "Cache write failed, disabling cache for this run");
            ctx.cache_enabled = false;
        }
    }
}

/// Run one stage, turning a panic into a [`PipelineError`] for `state`.
async fn guarded<T, F>(state: PipelineState, stage: F) -> PipelineResult<T>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(stage)
        .catch_unwind()
        .await
        .map_err(|panic| PipelineError::Stage {
            state,
            message: panic_message(panic.as_ref()),
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic".to_string()
    }
}
