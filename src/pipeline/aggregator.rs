use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{info, warn};

use super::{CallPolicy, Origin, Reference, RetrievalQuery};
use crate::error::{RetrievalError, RetrievalResult};
use crate::search::{ExternalReferenceSearch, InternalReferenceSearch};

/// Output of the retrieval stage. Each list comes solely from its own branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedReferences {
    /// Ranked internal references.
    pub internal_refs: Vec<Reference>,
    /// Ranked external references.
    pub external_refs: Vec<Reference>,
    /// Branches that failed, timed out or aborted.
    pub failed_origins: Vec<Origin>,
}

/// Stage 3: fans out to both reference stores and joins the results.
///
/// Each branch runs as its own task with its own failure boundary. A branch
/// that errors, times out or panics resolves to an empty list without
/// touching the other.
#[derive(Clone)]
pub struct ReferenceAggregator {
    internal: Arc<dyn InternalReferenceSearch>,
    external: Arc<dyn ExternalReferenceSearch>,
    policy: CallPolicy,
    top_n: usize,
}

impl ReferenceAggregator {
    /// Create an aggregator returning at most `top_n` references per origin.
    pub fn new(
        internal: Arc<dyn InternalReferenceSearch>,
        external: Arc<dyn ExternalReferenceSearch>,
        policy: CallPolicy,
        top_n: usize,
    ) -> Self {
        Self {
            internal,
            external,
            policy,
            top_n,
        }
    }

    /// Run both searches concurrently and wait for both.
    pub async fn search(&self, query: &RetrievalQuery) -> AggregatedReferences {
        let start = Instant::now();
        let (policy, top_n) = (self.policy, self.top_n);

        let internal_task = {
            let search = Arc::clone(&self.internal);
            let query = query.internal_query.clone();
            tokio::spawn(async move {
                policy
                    .call("internal_search", || search.search(&query, top_n))
                    .await
                    .map_err(RetrievalError::from)
            })
        };

        let external_task = {
            let search = Arc::clone(&self.external);
            let query = query.external_query.clone();
            tokio::spawn(async move {
                policy
                    .call("external_search", || search.search(&query, top_n))
                    .await
                    .map_err(RetrievalError::from)
            })
        };

        let (internal, external) = tokio::join!(internal_task, external_task);

        let mut aggregated = AggregatedReferences::default();
        match settle(Origin::Internal, internal, top_n) {
            Some(refs) => aggregated.internal_refs = refs,
            None => aggregated.failed_origins.push(Origin::Internal),
        }
        match settle(Origin::External, external, top_n) {
            Some(refs) => aggregated.external_refs = refs,
            None => aggregated.failed_origins.push(Origin::External),
        }

        info!(
            internal = aggregated.internal_refs.len(),
            external = aggregated.external_refs.len(),
            failed = aggregated.failed_origins.len(),
            latency_ms = start.elapsed().as_millis(),
            "Reference retrieval completed"
        );

        aggregated
    }
}

/// Resolve one joined branch into its ranked references, or `None` on failure.
fn settle<H>(
    origin: Origin,
    joined: Result<RetrievalResult<Vec<H>>, JoinError>,
    top_n: usize,
) -> Option<Vec<Reference>>
where
    H: Into<Reference>,
{
    let error = match joined {
        Ok(Ok(hits)) => return Some(rank(hits.into_iter().map(Into::into).collect(), top_n)),
        Ok(Err(e)) => e,
        Err(join_error) => RetrievalError::Branch {
            message: join_error.to_string(),
        },
    };

    warn!(origin = %origin, error = %error, "Retrieval branch failed, continuing without it");
    None
}

/// Sort by relevance descending and keep the first `top_n`.
///
/// The sort is stable, so equally relevant references keep provider order.
pub fn rank(mut refs: Vec<Reference>, top_n: usize) -> Vec<Reference> {
    refs.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    refs.truncate(top_n);
    refs
}
