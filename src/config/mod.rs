use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Langbase API configuration
    pub langbase: LangbaseConfig,
    /// Reference search endpoints
    pub search: SearchConfig,
    /// Cache backend and TTLs
    pub cache: CacheConfig,
    /// Pipeline bounds and call policy
    pub pipeline: PipelineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// HTTP request configuration
    pub request: RequestConfig,
    /// Pipe name configuration
    pub pipes: PipeConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    /// Bearer token (`LANGBASE_API_KEY`)
    pub api_key: String,
    /// API root (`LANGBASE_BASE_URL`)
    pub base_url: String,
}

/// Reference search endpoints
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Organization document index
    pub internal: SearchEndpoint,
    /// Public web search
    pub external: SearchEndpoint,
}

/// A single search service endpoint
#[derive(Debug, Clone)]
pub struct SearchEndpoint {
    /// Service root URL
    pub base_url: String,
    /// Bearer token, omitted when unset or blank
    pub api_key: Option<String>,
}

/// Which cache backend holds analysis results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process map, lost on exit
    Memory,
    /// SQLite file, shared across processes
    Sqlite,
}

/// Analysis cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Storage backend
    pub backend: CacheBackend,
    /// Database settings, used by the SQLite backend
    pub database: DatabaseConfig,
    /// Lifetime of a complete result
    pub ttl_secs: u64,
    /// Lifetime of a result that carries degradations
    pub degraded_ttl_secs: u64,
}

/// Database configuration for the SQLite cache backend
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    /// Pool size
    pub max_connections: u32,
}

/// Pipeline bounds and per-stage call policy
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// References kept per origin
    pub top_n: usize,
    /// References per origin quoted into the synthesis prompt
    pub synthesis_refs_per_origin: usize,
    /// Characters of each reference quoted into the synthesis prompt
    pub reference_char_limit: usize,
    /// Deadline per language model attempt
    pub llm_timeout_ms: u64,
    /// Deadline per search attempt
    pub search_timeout_ms: u64,
    /// Attempts per stage call, first one included
    pub max_attempts: u32,
    /// Base delay between stage attempts
    pub backoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request HTTP timeout
    pub timeout_ms: u64,
    /// Client-level retries after the first attempt
    pub max_retries: u32,
    /// Base delay, doubled on each retry
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe used by every stage
    pub analysis: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env_string("LANGBASE_BASE_URL", "https://api.langbase.com"),
        };

        let search = SearchConfig {
            internal: SearchEndpoint {
                base_url: env_string("INTERNAL_SEARCH_URL", "http://localhost:8080"),
                api_key: env_optional("INTERNAL_SEARCH_API_KEY"),
            },
            external: SearchEndpoint {
                base_url: env_string("WEB_SEARCH_URL", "http://localhost:8081"),
                api_key: env_optional("WEB_SEARCH_API_KEY"),
            },
        };

        let cache = CacheConfig {
            backend: match env_string("CACHE_BACKEND", "memory")
                .to_lowercase()
                .as_str()
            {
                "sqlite" => CacheBackend::Sqlite,
                _ => CacheBackend::Memory,
            },
            database: DatabaseConfig {
                path: PathBuf::from(env_string("CACHE_DATABASE_PATH", "./data/analysis-cache.db")),
                max_connections: env_or("CACHE_MAX_CONNECTIONS", 5),
            },
            ttl_secs: env_or("CACHE_TTL_SECS", 3600),
            degraded_ttl_secs: env_or("DEGRADED_CACHE_TTL_SECS", 60),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            top_n: env_or("TOP_N", defaults.top_n),
            synthesis_refs_per_origin: env_or(
                "SYNTHESIS_REFS_PER_ORIGIN",
                defaults.synthesis_refs_per_origin,
            ),
            reference_char_limit: env_or("REFERENCE_CHAR_LIMIT", defaults.reference_char_limit),
            llm_timeout_ms: env_or("LLM_TIMEOUT_MS", defaults.llm_timeout_ms),
            search_timeout_ms: env_or("SEARCH_TIMEOUT_MS", defaults.search_timeout_ms),
            max_attempts: env_or("STAGE_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_ms: env_or("STAGE_BACKOFF_MS", defaults.backoff_ms),
        };

        let logging = LoggingConfig {
            level: env_string("LOG_LEVEL", "info"),
            format: match env_string("LOG_FORMAT", "pretty").to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            analysis: env_string("PIPE_ANALYSIS", "grounded-analysis-v1"),
        };

        Ok(Config {
            langbase,
            search,
            cache,
            pipeline,
            logging,
            request,
            pipes,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            synthesis_refs_per_origin: 3,
            reference_char_limit: 600,
            llm_timeout_ms: 45000,
            search_timeout_ms: 15000,
            max_attempts: 2,
            backoff_ms: 500,
        }
    }
}
