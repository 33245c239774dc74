//! Redis Remote Store
//!
//! `RemoteStore` over a deadpool-redis connection pool. Acquiring a pooled
//! connection is retried with exponential backoff up to `maxRetries` times.

use crate::cache::backend::{RemoteMemoryInfo, RemoteStore};
use crate::cache::layers::RemoteLayerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Build the connection URL from the layer configuration
///
/// Fails when the host is missing or the port is zero.
pub fn redis_url(config: &RemoteLayerConfig) -> Result<String> {
    let host = config
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Configuration("cache.redis.host is required".to_string()))?;

    if config.port == 0 {
        return Err(Error::Configuration("cache.redis.port must be non-zero".to_string()));
    }

    let auth = match config.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => format!(":{}@", urlencoding::encode(password)),
        None => String::new(),
    };

    Ok(format!("redis://{}{}:{}/{}", auth, host, config.port, config.db))
}

/// Redis-backed remote store
pub struct RedisStore {
    pool: Pool,
    max_retries: u32,
    acquire_budget: Duration,
}

impl RedisStore {
    /// Create the connection pool; no connection is opened until first use
    pub fn connect(config: &RemoteLayerConfig) -> Result<Self> {
        let url = redis_url(config)?;
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Configuration(format!("invalid redis configuration: {}", e)))?;

        info!(
            host = config.host.as_deref().unwrap_or_default(),
            port = config.port,
            db = config.db,
            "Redis connection pool created"
        );

        Ok(Self {
            pool,
            max_retries: config.max_retries,
            acquire_budget: Duration::from_millis(config.timeout_ms),
        })
    }

    async fn connection(&self) -> Result<Connection> {
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(25))
            .with_max_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(self.acquire_budget))
            .build();

        backoff::future::retry(policy, || async {
            match self.pool.get().await {
                Ok(conn) => Ok(conn),
                Err(e) => {
                    let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let err = Error::RemotePool(e.to_string());
                    if attempt > self.max_retries {
                        Err(backoff::Error::permanent(err))
                    } else {
                        debug!(attempt, error = %err, "Retrying redis connection");
                        Err(backoff::Error::transient(err))
                    }
                }
            }
        })
        .await
    }

    async fn run<T, F, Fut>(&self, command: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        Ok(command(conn).await?)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(|mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.run(|mut conn| async move { conn.set::<_, _, ()>(key, value).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, value, ttl_secs).await })
            .await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.run(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run(|mut conn| async move { conn.exists::<_, bool>(key).await })
            .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        // -2 = missing, -1 = no expiry
        let ttl: i64 = self
            .run(|mut conn| async move { conn.ttl::<_, i64>(key).await })
            .await?;
        Ok((ttl >= 0).then_some(ttl as u64))
    }

    async fn flush(&self) -> Result<()> {
        self.run(|mut conn| async move {
            let reply: redis::RedisResult<()> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
            reply
        })
        .await
    }

    async fn dbsize(&self) -> Result<u64> {
        self.run(|mut conn| async move {
            let reply: redis::RedisResult<u64> = redis::cmd("DBSIZE").query_async(&mut conn).await;
            reply
        })
        .await
    }

    async fn memory_info(&self) -> Result<RemoteMemoryInfo> {
        let info: String = self
            .run(|mut conn| async move {
                let reply: redis::RedisResult<String> =
                    redis::cmd("INFO").arg("memory").query_async(&mut conn).await;
                reply
            })
            .await?;
        Ok(RemoteMemoryInfo::parse(&info))
    }

    async fn ping(&self) -> Result<String> {
        self.run(|mut conn| async move {
            let reply: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            reply
        })
        .await
    }
}
