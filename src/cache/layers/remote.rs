//! Remote Layer
//!
//! Shared cache over a `RemoteStore`. The remote store is optional
//! infrastructure, so every operation swallows backend errors, counts them
//! and degrades to a safe default. Each store call is bounded by a hard
//! timeout.

use crate::cache::backend::{RedisStore, RemoteMemoryInfo, RemoteStore, RemoteStoreRef};
use crate::cache::entry::CacheValue;
use crate::cache::layers::{CacheLayer, LayerInstruments, REMOTE_PRIORITY};
use crate::cache::metrics::CacheLayerStats;
use crate::error::{Error, Result};
use crate::telemetry::MetricsSinkRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LAYER_NAME: &str = "remote";

// =============================================================================
// Remote Layer Configuration
// =============================================================================

/// Configuration for the remote layer (`cache.redis`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteLayerConfig {
    /// Store host; required, no default
    pub host: Option<String>,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    /// TTL in seconds applied when a write gives none (0 = no expiry)
    pub ttl: u64,
    /// Connection-acquire retries
    pub max_retries: u32,
    /// Hard timeout per store call, in milliseconds
    pub timeout_ms: u64,
}

impl Default for RemoteLayerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 6379,
            password: None,
            db: 0,
            ttl: 3600,
            max_retries: 3,
            timeout_ms: 1000,
        }
    }
}

impl RemoteLayerConfig {
    /// Reject configurations the layer cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.host.as_deref().map(str::trim).unwrap_or_default().is_empty() {
            return Err(Error::Configuration("cache.redis.host is required".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Configuration("cache.redis.port must be non-zero".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Configuration("cache.redis.timeoutMs must be non-zero".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Health Types
// =============================================================================

/// Remote store memory figures
pub type RemoteMemoryUsage = RemoteMemoryInfo;

/// Connection health of the remote layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Whether the most recent store call succeeded
    pub connected: bool,
    pub operation_count: u64,
    pub error_count: u64,
}

// =============================================================================
// Remote Layer
// =============================================================================

/// Shared remote cache layer
pub struct RemoteLayer {
    store: RemoteStoreRef,
    config: RemoteLayerConfig,
    instruments: LayerInstruments,
    connected: AtomicBool,
}

impl RemoteLayer {
    /// Build a Redis-backed layer
    ///
    /// Missing connection parameters are fatal here; an unreachable server is
    /// not, since the pool connects lazily.
    pub fn connect(config: RemoteLayerConfig, metrics: MetricsSinkRef) -> Result<Self> {
        config.validate()?;
        let store = RedisStore::connect(&config)?;
        Ok(Self::with_store(config, Arc::new(store), metrics))
    }

    /// Build the layer over any store implementation
    pub fn with_store(
        config: RemoteLayerConfig,
        store: RemoteStoreRef,
        metrics: MetricsSinkRef,
    ) -> Self {
        info!(
            layer = LAYER_NAME,
            timeout_ms = config.timeout_ms,
            default_ttl = config.ttl,
            "Remote cache layer initialized"
        );
        Self {
            store,
            config,
            instruments: LayerInstruments::new(LAYER_NAME, metrics),
            connected: AtomicBool::new(true),
        }
    }

    /// Memory figures reported by the store
    pub async fn memory_usage(&self) -> Option<RemoteMemoryUsage> {
        match self.call("memory_info", self.store.memory_info()).await {
            Ok(info) => Some(info),
            Err(e) => {
                self.record_failure("memory_info", None, &e);
                None
            }
        }
    }

    /// Connection flag and operation counters
    pub fn connection_status(&self) -> ConnectionStatus {
        let counters = self.instruments.counters();
        ConnectionStatus {
            connected: self.connected.load(Ordering::Relaxed),
            operation_count: counters.operation_count(),
            error_count: counters.error_count(),
        }
    }

    /// Liveness probe; `Ok("PONG")` when the store answers
    ///
    /// The only operation that returns the store error to the caller.
    pub async fn ping(&self) -> Result<String> {
        let reply = self.call("ping", self.store.ping()).await;
        match &reply {
            Ok(_) => self.connected.store(true, Ordering::Relaxed),
            Err(e) => self.record_failure("ping", None, e),
        }
        reply
    }

    async fn call<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::RemoteTimeout {
                operation: operation.to_string(),
                timeout,
            }),
        };
        if result.is_ok() {
            self.connected.store(true, Ordering::Relaxed);
        }
        result
    }

    fn record_failure(&self, operation: &str, key: Option<&str>, error: &Error) {
        if error.is_transient() {
            self.connected.store(false, Ordering::Relaxed);
        }
        self.instruments.failure(operation);
        warn!(
            layer = LAYER_NAME,
            operation,
            key = key.unwrap_or_default(),
            error = %error,
            "Remote cache operation failed"
        );
    }

    fn effective_ttl(&self, ttl: Option<u64>) -> u64 {
        ttl.unwrap_or(self.config.ttl)
    }
}

#[async_trait]
impl CacheLayer for RemoteLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn priority(&self) -> u32 {
        REMOTE_PRIORITY
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        let raw = match self.call("get", self.store.get(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                self.record_failure("get", Some(key), &e);
                return None;
            }
        };

        let Some(raw) = raw else {
            self.instruments.miss("get");
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(wire) => {
                self.instruments.hit("get");
                Some(CacheValue::from_wire(wire))
            }
            Err(e) => {
                self.record_failure("get", Some(key), &Error::from(e));
                None
            }
        }
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<u64>) -> Result<()> {
        let payload = match serde_json::to_string(&value.to_wire()) {
            Ok(payload) => payload,
            Err(e) => {
                self.record_failure("set", Some(key), &Error::from(e));
                return Ok(());
            }
        };

        let ttl = self.effective_ttl(ttl);
        let result = if ttl == 0 {
            self.call("set", self.store.set(key, &payload)).await
        } else {
            self.call("set", self.store.set_ex(key, &payload, ttl)).await
        };

        match result {
            Ok(()) => {
                self.instruments.success("set");
                debug!(layer = LAYER_NAME, key = %key, ttl, "Stored cache entry");
            }
            Err(e) => self.record_failure("set", Some(key), &e),
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.call("delete", self.store.del(key)).await {
            Ok(()) => self.instruments.success("delete"),
            Err(e) => self.record_failure("delete", Some(key), &e),
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        match self.call("exists", self.store.exists(key)).await {
            Ok(found) => {
                self.instruments.success("exists");
                found
            }
            Err(e) => {
                self.record_failure("exists", Some(key), &e);
                false
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        match self.call("clear", self.store.flush()).await {
            Ok(()) => {
                self.instruments.success("clear");
                info!(layer = LAYER_NAME, "Remote cache cleared");
            }
            Err(e) => self.record_failure("clear", None, &e),
        }
        Ok(())
    }

    async fn stats(&self) -> CacheLayerStats {
        let keys = match self.call("stats", self.store.dbsize()).await {
            Ok(keys) => keys,
            Err(e) => {
                self.record_failure("stats", None, &e);
                return CacheLayerStats::errored(self.instruments.counters().error_count());
            }
        };
        let memory = self.memory_usage().await.map(|m| m.used_bytes);
        self.instruments.stats(keys, memory)
    }

    async fn ttl(&self, key: &str) -> Option<u64> {
        match self.call("ttl", self.store.ttl(key)).await {
            Ok(ttl) => {
                self.instruments.success("ttl");
                ttl
            }
            Err(e) => {
                self.record_failure("ttl", Some(key), &e);
                None
            }
        }
    }

    async fn health_check(&self) -> bool {
        matches!(self.ping().await.as_deref(), Ok("PONG"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::InMemoryRemoteStore;
    use crate::telemetry::{NoopMetrics, OperationOutcome, PrometheusCacheMetrics};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use serde_json::json;

    fn layer() -> (RemoteLayer, Arc<InMemoryRemoteStore>) {
        let store = Arc::new(InMemoryRemoteStore::new());
        let layer = RemoteLayer::with_store(
            RemoteLayerConfig {
                timeout_ms: 200,
                ..Default::default()
            },
            store.clone(),
            NoopMetrics::shared(),
        );
        (layer, store)
    }

    #[tokio::test]
    async fn test_json_and_bytes_round_trip() {
        let (remote, _) = layer();

        remote.set("images:doc", json!({"w": 100}).into(), None).await.unwrap();
        assert_eq!(
            remote.get("images:doc").await.unwrap().as_json(),
            Some(&json!({"w": 100}))
        );

        let blob = Bytes::from_static(&[0, 159, 146, 150, 255]);
        remote.set("images:blob", blob.clone().into(), None).await.unwrap();
        assert_eq!(remote.get("images:blob").await.unwrap().as_bytes(), Some(&blob));
    }

    #[tokio::test]
    async fn test_ttl_policy() {
        let (remote, _) = layer();

        remote.set("a", json!(1).into(), None).await.unwrap();
        assert!(remote.ttl("a").await.unwrap() <= 3600);

        remote.set("b", json!(1).into(), Some(0)).await.unwrap();
        assert_eq!(remote.ttl("b").await, None);
        assert!(remote.exists("b").await);
    }

    #[tokio::test]
    async fn test_outage_is_swallowed() {
        let (remote, store) = layer();
        remote.set("k", json!(1).into(), None).await.unwrap();
        store.set_available(false);

        assert!(remote.get("k").await.is_none());
        assert!(remote.set("k", json!(2).into(), None).await.is_ok());
        assert!(remote.delete("k").await.is_ok());
        assert!(!remote.exists("k").await);
        assert!(remote.clear().await.is_ok());

        let stats = remote.stats().await;
        assert!(stats.errors >= 5);
        assert_eq!(stats.keys, 0);

        let status = remote.connection_status();
        assert!(!status.connected);
        assert!(status.error_count >= 5);
        assert!(!remote.health_check().await);

        store.set_available(true);
        assert_eq!(remote.ping().await.unwrap(), "PONG");
        assert!(remote.connection_status().connected);
    }

    #[tokio::test]
    async fn test_hard_timeout() {
        let (remote, store) = layer();
        store.set_latency(Duration::from_millis(500));

        let started = std::time::Instant::now();
        assert!(remote.get("slow").await.is_none());
        assert!(started.elapsed() < Duration::from_millis(450));
        assert_matches!(remote.ping().await, Err(Error::RemoteTimeout { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_miss() {
        let (remote, store) = layer();
        store.set("bad", "{not json").await.unwrap();

        assert!(remote.get("bad").await.is_none());
        assert_eq!(remote.connection_status().error_count, 1);
    }

    #[tokio::test]
    async fn test_memory_usage() {
        let (remote, _) = layer();
        remote.set("k", json!("value").into(), None).await.unwrap();
        let usage = remote.memory_usage().await.unwrap();
        assert!(usage.used_bytes > 0);
    }

    #[test]
    fn test_missing_host_is_fatal() {
        let config = RemoteLayerConfig {
            host: None,
            ..Default::default()
        };
        assert_matches!(
            RemoteLayer::connect(config, NoopMetrics::shared()).err(),
            Some(Error::Configuration(_))
        );
    }

    #[test]
    fn test_host_has_no_default() {
        let config = RemoteLayerConfig::default();
        assert!(config.host.is_none());
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_lookups_report_to_sink() {
        let metrics = Arc::new(PrometheusCacheMetrics::new().unwrap());
        let remote = RemoteLayer::with_store(
            RemoteLayerConfig::default(),
            Arc::new(InMemoryRemoteStore::new()),
            metrics.clone(),
        );
        remote.set("k", json!(1).into(), Some(60)).await.unwrap();

        assert!(remote.exists("k").await);
        assert!(remote.ttl("k").await.unwrap() <= 60);

        assert_eq!(metrics.operation_count("exists", "remote", OperationOutcome::Success), 1);
        assert_eq!(metrics.operation_count("ttl", "remote", OperationOutcome::Success), 1);
    }
}
