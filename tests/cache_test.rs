//! Integration tests for the analysis cache backends
//!
//! The SQLite backend runs against a temporary database file so migrations
//! and persistence across pool instances are covered.

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use grounded_analysis::cache::{
    open_cache, AnalysisCache, CacheKey, CachedValue, MemoryCache, SqliteCache,
};
use grounded_analysis::config::{CacheBackend, CacheConfig, DatabaseConfig};
use grounded_analysis::error::{ProviderResult, RetrievalResult};
use grounded_analysis::llm::{GenerationRequest, LanguageModelClient};
use grounded_analysis::pipeline::{
    request_hash, AnalysisOrchestrator, AnalysisResult, CallPolicy, Degradation, EnhancedPrompt,
    NoopObserver, Origin, PipelineSettings, Reference,
};
use grounded_analysis::prompts::QUERY_PLANNER_PROMPT;
use grounded_analysis::search::{
    ExternalHit, ExternalReferenceSearch, InternalHit, InternalReferenceSearch,
};

/// Scores with long shortest decimal forms; a lossy float parser reads them back one ULP off.
const FINE_SCORES: [f64; 3] = [0.09139753876361889, 0.7365219930201851, 0.1234567890123456];

async fn create_test_cache(dir: &TempDir) -> SqliteCache {
    let config = DatabaseConfig {
        path: dir.path().join("cache").join("analysis.db"),
        max_connections: 2,
    };
    SqliteCache::new(&config)
        .await
        .expect("Failed to create cache")
}

fn sample_result(content: &str) -> AnalysisResult {
    AnalysisResult {
        request_hash: request_hash("Summarize adoption trends for AI writing tools", None),
        content: content.to_string(),
        internal_refs: vec![Reference {
            title: "Q3 memo".to_string(),
            content: "Adoption rose 40%".to_string(),
            source_or_url: "memos/q3.md".to_string(),
            relevance_score: 0.9,
            origin: Origin::Internal,
        }],
        external_refs: vec![],
        enhanced_prompt: "Analyze adoption of AI writing tools".to_string(),
        generated_at: Utc::now(),
        degradations: vec![Degradation::RetrievalFailed {
            origin: Origin::External,
        }],
    }
}

fn key() -> CacheKey {
    CacheKey::analysis(request_hash("Summarize adoption trends for AI writing tools", None))
}

#[cfg(test)]
mod sqlite_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_put_then_get_round_trips_analysis() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;
        let value = CachedValue::Analysis(Box::new(sample_result("Findings")));

        cache
            .put(&key(), value.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        let loaded = cache.get(&key()).await.unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn test_stages_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;
        let hash = request_hash("same request", None);

        cache
            .put(
                &CacheKey::enhanced_prompt(hash.clone()),
                CachedValue::EnhancedPrompt(EnhancedPrompt::refined("refined")),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(cache.get(&CacheKey::analysis(hash.clone())).await.unwrap().is_none());
        assert!(matches!(
            cache.get(&CacheKey::enhanced_prompt(hash)).await.unwrap(),
            Some(CachedValue::EnhancedPrompt(_))
        ));
    }

    #[tokio::test]
    async fn test_live_entry_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;

        let first = CachedValue::Analysis(Box::new(sample_result("first")));
        let second = CachedValue::Analysis(Box::new(sample_result("second")));

        cache.put(&key(), first.clone(), Duration::from_secs(60)).await.unwrap();
        cache.put(&key(), second, Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get(&key()).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_and_replaceable() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;

        let stale = CachedValue::Analysis(Box::new(sample_result("stale")));
        let fresh = CachedValue::Analysis(Box::new(sample_result("fresh")));

        cache.put(&key(), stale, Duration::from_millis(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(cache.get(&key()).await.unwrap().is_none());

        cache.put(&key(), fresh.clone(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_put_over_expired_row_without_prior_read() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;

        let stale = CachedValue::Analysis(Box::new(sample_result("stale")));
        let fresh = CachedValue::Analysis(Box::new(sample_result("fresh")));

        cache.put(&key(), stale, Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.put(&key(), fresh.clone(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get(&key()).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_stale_rows() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;

        cache
            .put(
                &CacheKey::analysis("short"),
                CachedValue::EnhancedPrompt(EnhancedPrompt::refined("a")),
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        cache
            .put(
                &CacheKey::analysis("long"),
                CachedValue::EnhancedPrompt(EnhancedPrompt::refined("b")),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.get(&CacheKey::analysis("long")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let value = CachedValue::Analysis(Box::new(sample_result("persisted")));

        {
            let cache = create_test_cache(&dir).await;
            cache.put(&key(), value.clone(), Duration::from_secs(60)).await.unwrap();
        }

        let reopened = create_test_cache(&dir).await;
        assert_eq!(reopened.get(&key()).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DatabaseConfig {
            path: ":memory:".into(),
            max_connections: 5,
        };
        let cache = SqliteCache::new(&config).await.unwrap();
        let value = CachedValue::EnhancedPrompt(EnhancedPrompt::refined("in memory"));

        cache.put(&key(), value.clone(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), Some(value));
    }
}

/// Language model that answers every stage with fixed text.
#[derive(Default)]
struct EchoModel {
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModelClient for EchoModel {
    async fn generate(&self, request: GenerationRequest) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.system_instruction == QUERY_PLANNER_PROMPT {
            Ok(r#"{"internal_query": "rollout memos", "external_query": "market reports"}"#
                .to_string())
        } else {
            Ok("Adoption doubled [I1] while the market grew [E1].".to_string())
        }
    }
}

#[derive(Default)]
struct FineScoreIndex {
    calls: AtomicUsize,
}

#[async_trait]
impl InternalReferenceSearch for FineScoreIndex {
    async fn search(&self, _query: &str, _top_n: usize) -> RetrievalResult<Vec<InternalHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FINE_SCORES
            .iter()
            .enumerate()
            .map(|(i, score)| InternalHit {
                title: format!("Memo {}", i),
                content: format!("Internal finding {}", i),
                score: *score,
                source_detail: format!("memos/{}.md", i),
            })
            .collect())
    }
}

#[derive(Default)]
struct FineScoreWeb {
    calls: AtomicUsize,
}

#[async_trait]
impl ExternalReferenceSearch for FineScoreWeb {
    async fn search(&self, _query: &str, _top_n: usize) -> RetrievalResult<Vec<ExternalHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ExternalHit {
            title: "Industry report".to_string(),
            content: "Market grew 30% year over year".to_string(),
            score: 0.30000000000000004,
            url: "https://example.com/report".to_string(),
        }])
    }
}

fn pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        llm_policy: CallPolicy::single(Duration::from_secs(5)),
        search_policy: CallPolicy::single(Duration::from_secs(5)),
        ..PipelineSettings::default()
    }
}

#[cfg(test)]
mod orchestrator_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_sqlite_cache_hit_is_bit_identical() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(create_test_cache(&dir).await);
        let model = Arc::new(EchoModel::default());
        let index = Arc::new(FineScoreIndex::default());
        let web = Arc::new(FineScoreWeb::default());
        let orchestrator = AnalysisOrchestrator::new(
            model.clone(),
            index.clone(),
            web.clone(),
            cache,
            pipeline_settings(),
        );

        let first = orchestrator
            .run("Summarize adoption trends", None, &NoopObserver)
            .await
            .unwrap();
        let second = orchestrator
            .run("Summarize adoption trends", None, &NoopObserver)
            .await
            .unwrap();

        assert_eq!(first, second);
        let scores: Vec<u64> = second
            .internal_refs
            .iter()
            .map(|r| r.relevance_score.to_bits())
            .collect();
        let mut expected: Vec<f64> = FINE_SCORES.to_vec();
        expected.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(scores, expected.iter().map(|s| s.to_bits()).collect::<Vec<_>>());

        // The second run never left the cache
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
        assert_eq!(web.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fine_scores_survive_sqlite_storage() {
        let dir = TempDir::new().unwrap();
        let cache = create_test_cache(&dir).await;

        let mut result = sample_result("Findings");
        result.internal_refs = FINE_SCORES
            .iter()
            .map(|score| Reference {
                title: "Memo".to_string(),
                content: "Finding".to_string(),
                source_or_url: "memos/a.md".to_string(),
                relevance_score: *score,
                origin: Origin::Internal,
            })
            .collect();
        let value = CachedValue::Analysis(Box::new(result));

        cache.put(&key(), value.clone(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key()).await.unwrap(), Some(value));
    }
}

#[cfg(test)]
mod open_cache_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache_config(backend: CacheBackend, path: std::path::PathBuf) -> CacheConfig {
        CacheConfig {
            backend,
            database: DatabaseConfig {
                path,
                max_connections: 2,
            },
            ttl_secs: 3600,
            degraded_ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_open_cache_uses_sqlite_when_available() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("analysis.db");
        let cache = open_cache(&cache_config(CacheBackend::Sqlite, path.clone())).await;
        let value = CachedValue::EnhancedPrompt(EnhancedPrompt::refined("stored"));

        cache.put(&key(), value.clone(), Duration::from_secs(60)).await.unwrap();

        assert!(path.exists());
        assert_eq!(cache.get(&key()).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_unopenable_database_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        // A regular file where the cache directory should be
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"occupied").unwrap();
        let path = blocker.join("analysis.db");

        let cache = open_cache(&cache_config(CacheBackend::Sqlite, path.clone())).await;
        let value = CachedValue::EnhancedPrompt(EnhancedPrompt::refined("kept in memory"));

        cache.put(&key(), value.clone(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get(&key()).await.unwrap(), Some(value));
        assert!(!path.exists());
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_memory_cache_behaves_like_sqlite_for_live_entries() {
        let cache = MemoryCache::new();
        let first = CachedValue::Analysis(Box::new(sample_result("first")));
        let second = CachedValue::Analysis(Box::new(sample_result("second")));

        cache.put(&key(), first.clone(), Duration::from_secs(60)).await.unwrap();
        cache.put(&key(), second, Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get(&key()).await.unwrap(), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_cache_expiry_under_paused_clock() {
        let cache = MemoryCache::new();
        let value = CachedValue::EnhancedPrompt(EnhancedPrompt::refined("p"));

        cache.put(&key(), value.clone(), Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get(&key()).await.unwrap(), Some(value));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key()).await.unwrap().is_none());
        assert!(cache.is_empty());
    }
}
