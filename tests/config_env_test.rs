//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy, so every test sets the API key itself.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use grounded_analysis::config::{CacheBackend, Config, LogFormat};
use grounded_analysis::pipeline::PipelineSettings;
use serial_test::serial;
use std::env;
use std::time::Duration;

fn with_api_key() {
    env::set_var("LANGBASE_API_KEY", "test-key");
}

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    with_api_key();

    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() should succeed with API key set");
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    let saved = env::var("LANGBASE_API_KEY").ok();
    env::remove_var("LANGBASE_API_KEY");

    // A .env file in the working directory may still supply the key
    if std::path::Path::new(".env").exists() {
        if let Some(key) = saved {
            env::set_var("LANGBASE_API_KEY", key);
        }
        return;
    }

    let result = Config::from_env();
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("LANGBASE_API_KEY"));

    if let Some(key) = saved {
        env::set_var("LANGBASE_API_KEY", key);
    }
}

#[test]
#[serial]
fn test_config_from_env_custom_base_url() {
    with_api_key();
    env::set_var("LANGBASE_BASE_URL", "https://custom.api.com");

    let config = Config::from_env().unwrap();
    assert_eq!(config.langbase.base_url, "https://custom.api.com");

    env::remove_var("LANGBASE_BASE_URL");
}

#[test]
#[serial]
fn test_config_from_env_search_endpoints() {
    with_api_key();
    env::set_var("INTERNAL_SEARCH_URL", "http://index.internal:9000");
    env::set_var("INTERNAL_SEARCH_API_KEY", "index-key");
    env::set_var("WEB_SEARCH_URL", "https://search.example.com");
    env::set_var("WEB_SEARCH_API_KEY", "");

    let config = Config::from_env().unwrap();
    assert_eq!(config.search.internal.base_url, "http://index.internal:9000");
    assert_eq!(config.search.internal.api_key, Some("index-key".to_string()));
    assert_eq!(config.search.external.base_url, "https://search.example.com");
    assert_eq!(config.search.external.api_key, None);

    env::remove_var("INTERNAL_SEARCH_URL");
    env::remove_var("INTERNAL_SEARCH_API_KEY");
    env::remove_var("WEB_SEARCH_URL");
    env::remove_var("WEB_SEARCH_API_KEY");
}

#[test]
#[serial]
fn test_config_from_env_sqlite_cache() {
    with_api_key();
    env::set_var("CACHE_BACKEND", "SQLite");
    env::set_var("CACHE_DATABASE_PATH", "/custom/cache.db");
    env::set_var("CACHE_MAX_CONNECTIONS", "10");
    env::set_var("CACHE_TTL_SECS", "120");
    env::set_var("DEGRADED_CACHE_TTL_SECS", "15");

    let config = Config::from_env().unwrap();
    assert_eq!(config.cache.backend, CacheBackend::Sqlite);
    assert_eq!(config.cache.database.path.to_str().unwrap(), "/custom/cache.db");
    assert_eq!(config.cache.database.max_connections, 10);
    assert_eq!(config.cache.ttl_secs, 120);
    assert_eq!(config.cache.degraded_ttl_secs, 15);

    env::remove_var("CACHE_BACKEND");
    env::remove_var("CACHE_DATABASE_PATH");
    env::remove_var("CACHE_MAX_CONNECTIONS");
    env::remove_var("CACHE_TTL_SECS");
    env::remove_var("DEGRADED_CACHE_TTL_SECS");
}

#[test]
#[serial]
fn test_config_unknown_cache_backend_uses_memory() {
    with_api_key();
    env::set_var("CACHE_BACKEND", "redis");

    let config = Config::from_env().unwrap();
    assert_eq!(config.cache.backend, CacheBackend::Memory);

    env::remove_var("CACHE_BACKEND");
}

#[test]
#[serial]
fn test_config_from_env_pipeline_bounds() {
    with_api_key();
    env::set_var("TOP_N", "8");
    env::set_var("SYNTHESIS_REFS_PER_ORIGIN", "4");
    env::set_var("LLM_TIMEOUT_MS", "20000");
    env::set_var("SEARCH_TIMEOUT_MS", "5000");
    env::set_var("STAGE_MAX_ATTEMPTS", "3");
    env::set_var("STAGE_BACKOFF_MS", "250");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipeline.top_n, 8);
    assert_eq!(config.pipeline.synthesis_refs_per_origin, 4);

    let settings = PipelineSettings::from_config(&config);
    assert_eq!(settings.top_n, 8);
    assert_eq!(settings.llm_policy.timeout, Duration::from_secs(20));
    assert_eq!(settings.search_policy.timeout, Duration::from_secs(5));
    assert_eq!(settings.search_policy.max_attempts, 3);
    assert_eq!(settings.llm_policy.backoff, Duration::from_millis(250));

    env::remove_var("TOP_N");
    env::remove_var("SYNTHESIS_REFS_PER_ORIGIN");
    env::remove_var("LLM_TIMEOUT_MS");
    env::remove_var("SEARCH_TIMEOUT_MS");
    env::remove_var("STAGE_MAX_ATTEMPTS");
    env::remove_var("STAGE_BACKOFF_MS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_api_key();
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    env::remove_var("LOG_FORMAT");
}

#[test]
#[serial]
fn test_config_from_env_custom_request() {
    with_api_key();
    env::set_var("REQUEST_TIMEOUT_MS", "60000");
    env::set_var("MAX_RETRIES", "5");
    env::set_var("RETRY_DELAY_MS", "2000");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 60000);
    assert_eq!(config.request.max_retries, 5);
    assert_eq!(config.request.retry_delay_ms, 2000);

    env::remove_var("REQUEST_TIMEOUT_MS");
    env::remove_var("MAX_RETRIES");
    env::remove_var("RETRY_DELAY_MS");
}

#[test]
#[serial]
fn test_config_from_env_custom_pipe() {
    with_api_key();
    env::set_var("PIPE_ANALYSIS", "custom-analysis-v2");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipes.analysis, "custom-analysis-v2");

    env::remove_var("PIPE_ANALYSIS");
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    with_api_key();
    env::set_var("TOP_N", "not-a-number");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipeline.top_n, 5);

    env::remove_var("TOP_N");
}

#[test]
#[serial]
fn test_config_from_env_log_level() {
    with_api_key();
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_LEVEL");
}
