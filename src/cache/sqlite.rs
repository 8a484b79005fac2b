use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{AnalysisCache, CacheKey, CachedValue};
use crate::config::DatabaseConfig;
use crate::error::{CacheError, CacheResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed cache, shared across processes on the same host.
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

impl SqliteCache {
    /// Open (or create) the cache database and run migrations
    pub async fn new(config: &DatabaseConfig) -> CacheResult<Self> {
        let in_memory = config.path.to_str() == Some(":memory:");

        let database_url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CacheError::Connection {
                    message: format!("Failed to create cache directory: {}", e),
                })?;
            }
            format!("sqlite://{}?mode=rwc", config.path.display())
        };

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| CacheError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        // Every in-memory connection would get its own database
        let max_connections = if in_memory { 1 } else { config.max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::Connection {
                message: format!("Failed to connect to cache database: {}", e),
            })?;

        let cache = Self { pool };
        cache.run_migrations().await?;

        Ok(cache)
    }

    async fn run_migrations(&self) -> CacheResult<()> {
        info!("Running cache migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| CacheError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Cache migrations completed successfully");
        Ok(())
    }

    /// Delete every expired row and return how many were removed.
    pub async fn purge_expired(&self) -> CacheResult<u64> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AnalysisCache for SqliteCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CachedValue>> {
        let storage_key = key.storage_key();
        let now = Utc::now().timestamp_millis();

        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, expires_at FROM cache_entries WHERE cache_key = ?")
                .bind(&storage_key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((value, expires_at)) if expires_at > now => {
                Ok(Some(serde_json::from_str(&value)?))
            }
            Some(_) => {
                sqlx::query("DELETE FROM cache_entries WHERE cache_key = ? AND expires_at <= ?")
                    .bind(&storage_key)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                debug!(key = %key, "Evicted expired cache entry");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, value: CachedValue, ttl: Duration) -> CacheResult<()> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_at = now_ms.saturating_add(ttl_millis(ttl));
        let serialized = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, value, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            WHERE cache_entries.expires_at <= ?
            "#,
        )
        .bind(key.storage_key())
        .bind(serialized)
        .bind(expires_at)
        .bind(now.to_rfc3339())
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_saturates() {
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
        assert_eq!(ttl_millis(Duration::MAX), i64::MAX);
    }
}
