//! Content-addressed, TTL-bounded memoization of pipeline outputs.
//!
//! Entries are keyed by the request hash plus the stage that produced them.
//! Expiry is checked lazily on read: a stale entry is reported as absent and
//! removed by that read. There is no background eviction task.

mod memory;
mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{CacheBackend, CacheConfig};
use crate::error::CacheResult;
use crate::pipeline::{AnalysisResult, EnhancedPrompt};

/// Which pipeline output a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStage {
    /// Intermediate output of the refinement stage.
    EnhancedPrompt,
    /// Terminal result of a full run.
    Analysis,
}

impl CacheStage {
    /// Get the stage name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStage::EnhancedPrompt => "enhanced_prompt",
            CacheStage::Analysis => "analysis",
        }
    }
}

/// Cache key: request hash plus producing stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hash of the normalized request
    pub request_hash: String,
    /// Stage that produced the value
    pub stage: CacheStage,
}

impl CacheKey {
    /// Key for the terminal result of a request.
    pub fn analysis(request_hash: impl Into<String>) -> Self {
        Self {
            request_hash: request_hash.into(),
            stage: CacheStage::Analysis,
        }
    }

    /// Key for the refined prompt of a request.
    pub fn enhanced_prompt(request_hash: impl Into<String>) -> Self {
        Self {
            request_hash: request_hash.into(),
            stage: CacheStage::EnhancedPrompt,
        }
    }

    /// Flat string form used by storage backends.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.request_hash, self.stage.as_str())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// A value stored in the analysis cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    /// A refined prompt
    EnhancedPrompt(EnhancedPrompt),
    /// A finished run
    Analysis(Box<AnalysisResult>),
}

/// Storage for memoized pipeline outputs.
///
/// `put` on a key that still holds an unexpired entry leaves that entry in
/// place; entries are only ever replaced after they expire. Concurrent
/// writers for one key compute the same value, so whichever lands is fine.
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    /// Look up a live entry, removing it if it has expired.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CachedValue>>;

    /// Store a value for `ttl`.
    async fn put(&self, key: &CacheKey, value: CachedValue, ttl: Duration) -> CacheResult<()>;
}

/// Open the configured backend.
///
/// A SQLite database that cannot be opened leaves the process with an
/// in-memory cache instead of failing startup.
pub async fn open_cache(config: &CacheConfig) -> Arc<dyn AnalysisCache> {
    match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Sqlite => match SqliteCache::new(&config.database).await {
            Ok(cache) => {
                info!(path = %config.database.path.display(), "Cache database initialized");
                Arc::new(cache)
            }
            Err(e) => {
                warn!(
                    path = %config.database.path.display(),
                    error = %e,
                    "Cache database unavailable, falling back to in-memory cache"
                );
                Arc::new(MemoryCache::new())
            }
        },
    }
}
