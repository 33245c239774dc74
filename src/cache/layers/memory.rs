//! Memory Layer
//!
//! In-process cache backed by DashMap, with per-entry expiry and a periodic
//! background sweep. The fastest and most trusted layer: write failures are
//! surfaced to the caller.

use crate::cache::entry::CacheValue;
use crate::cache::layers::{CacheLayer, LayerInstruments, MEMORY_PRIORITY};
use crate::cache::metrics::CacheLayerStats;
use crate::error::{Error, Result};
use crate::telemetry::MetricsSinkRef;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LAYER_NAME: &str = "memory";

// =============================================================================
// Memory Layer Configuration
// =============================================================================

/// Configuration for the memory layer (`cache.memory`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryLayerConfig {
    /// TTL in seconds applied when a write gives none (0 = no expiry)
    pub default_ttl: u64,
    /// Seconds between expiry sweeps (0 = no background sweep)
    pub check_period: u64,
    /// Maximum number of keys (0 = unlimited)
    pub max_keys: u64,
    /// Maximum approximate footprint in bytes (0 = unlimited)
    pub max_size: u64,
    /// Fraction of `max_size` above which a warning is logged
    pub warning_threshold: f64,
}

impl Default for MemoryLayerConfig {
    fn default() -> Self {
        Self {
            default_ttl: 3600,
            check_period: 600,
            max_keys: 10_000,
            max_size: 512 * 1024 * 1024, // 512 MB
            warning_threshold: 0.8,
        }
    }
}

/// Memory footprint reported to health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: CacheValue,
    size_bytes: u64,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Key/value table shared with the sweep task
#[derive(Debug, Default)]
struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    used_bytes: AtomicU64,
}

impl MemoryStore {
    /// Account for bytes leaving the table; never wraps below zero
    fn release(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    fn remove(&self, key: &str) -> Option<MemoryEntry> {
        let removed = self.entries.remove(key).map(|(_, entry)| entry);
        if let Some(entry) = &removed {
            self.release(entry.size_bytes);
        }
        removed
    }

    /// Drop every entry, releasing each one's bytes as it goes
    ///
    /// Entries inserted concurrently are either removed here, with their
    /// bytes released, or survive with their bytes still counted.
    fn clear(&self) {
        self.entries.retain(|_, entry| {
            self.release(entry.size_bytes);
            false
        });
    }

    /// Drop every expired entry, returning how many were removed
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|r| r.value().is_expired(now))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            // Re-check under the shard lock; the key may have been rewritten
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| e.is_expired(now)) {
                self.release(entry.size_bytes);
                removed += 1;
            }
        }
        removed
    }
}

// =============================================================================
// Memory Layer
// =============================================================================

/// In-process cache layer
pub struct MemoryLayer {
    store: Arc<MemoryStore>,
    config: MemoryLayerConfig,
    instruments: LayerInstruments,
    above_warning: AtomicBool,
    sweeper: CancellationToken,
}

impl MemoryLayer {
    /// Create the layer; starts the expiry sweep when called inside a runtime
    pub fn new(config: MemoryLayerConfig, metrics: MetricsSinkRef) -> Self {
        let layer = Self {
            store: Arc::new(MemoryStore::default()),
            config,
            instruments: LayerInstruments::new(LAYER_NAME, metrics),
            above_warning: AtomicBool::new(false),
            sweeper: CancellationToken::new(),
        };
        layer.start_expiry_sweep();
        layer
    }

    fn start_expiry_sweep(&self) {
        if self.config.check_period == 0 || tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        let store = Arc::clone(&self.store);
        let token = self.sweeper.clone();
        let period = Duration::from_secs(self.config.check_period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            debug!(layer = LAYER_NAME, removed, "Expired entries swept");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    /// Remove expired entries now
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    /// Current footprint against the configured maximum
    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            used_bytes: self.store.used_bytes.load(Ordering::Relaxed),
            total_bytes: self.config.max_size,
        }
    }

    /// Number of entries currently held (expired ones included until swept)
    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    /// Check if the layer holds no entries
    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }

    fn check_capacity(&self, key: &str, new_size: u64) -> Result<()> {
        let existing = self.store.entries.get(key).map(|e| e.size_bytes);

        if existing.is_none()
            && self.config.max_keys > 0
            && self.store.entries.len() as u64 >= self.config.max_keys
        {
            return Err(Error::CacheFull {
                layer: LAYER_NAME.to_string(),
                reason: format!("max keys ({}) reached", self.config.max_keys),
            });
        }

        if self.config.max_size > 0 {
            let used = self.store.used_bytes.load(Ordering::Relaxed);
            let projected = used.saturating_sub(existing.unwrap_or(0)) + new_size;
            if projected > self.config.max_size {
                return Err(Error::CacheFull {
                    layer: LAYER_NAME.to_string(),
                    reason: format!(
                        "{} bytes would exceed max size {}",
                        projected, self.config.max_size
                    ),
                });
            }
        }

        Ok(())
    }

    fn check_warning_threshold(&self) {
        if self.config.max_size == 0 {
            return;
        }
        let used = self.store.used_bytes.load(Ordering::Relaxed);
        let ratio = used as f64 / self.config.max_size as f64;
        let above = ratio >= self.config.warning_threshold;

        // Log once per crossing
        if above && !self.above_warning.swap(true, Ordering::Relaxed) {
            warn!(
                layer = LAYER_NAME,
                used_bytes = used,
                max_bytes = self.config.max_size,
                "Memory cache above warning threshold"
            );
        } else if !above {
            self.above_warning.store(false, Ordering::Relaxed);
        }
    }

    fn effective_ttl(&self, ttl: Option<u64>) -> Option<u64> {
        match ttl {
            Some(0) => None,
            Some(ttl) => Some(ttl),
            None if self.config.default_ttl > 0 => Some(self.config.default_ttl),
            None => None,
        }
    }
}

impl Drop for MemoryLayer {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[async_trait]
impl CacheLayer for MemoryLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn priority(&self) -> u32 {
        MEMORY_PRIORITY
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        let found = self.store.entries.get(key).map(|e| {
            if e.is_expired(now) {
                None
            } else {
                Some(e.value.clone())
            }
        });

        match found {
            Some(Some(value)) => {
                self.instruments.hit("get");
                Some(value)
            }
            Some(None) => {
                if let Some((_, expired)) =
                    self.store.entries.remove_if(key, |_, e| e.is_expired(now))
                {
                    self.store.release(expired.size_bytes);
                }
                self.instruments.miss("get");
                None
            }
            None => {
                self.instruments.miss("get");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<u64>) -> Result<()> {
        let size_bytes = value.size_bytes() + key.len() as u64;

        if let Err(e) = self.check_capacity(key, size_bytes) {
            self.instruments.failure("set");
            warn!(layer = LAYER_NAME, key = %key, error = %e, "Memory cache write rejected");
            return Err(e);
        }

        let expires_at = self
            .effective_ttl(ttl)
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        let entry = MemoryEntry {
            value,
            size_bytes,
            expires_at,
        };

        // Counted before the entry is visible to any remover
        self.store.used_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        if let Some(old) = self.store.entries.insert(key.to_string(), entry) {
            self.store.release(old.size_bytes);
        }

        self.check_warning_threshold();
        self.instruments.success("set");
        debug!(layer = LAYER_NAME, key = %key, size = size_bytes, "Stored cache entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        self.instruments.success("delete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let found = self
            .store
            .entries
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false);
        self.instruments.success("exists");
        found
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear();
        self.above_warning.store(false, Ordering::Relaxed);
        self.instruments.success("clear");
        Ok(())
    }

    async fn stats(&self) -> CacheLayerStats {
        self.instruments.stats(
            self.store.entries.len() as u64,
            Some(self.store.used_bytes.load(Ordering::Relaxed)),
        )
    }

    async fn ttl(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let remaining = self
            .store
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs());
        self.instruments.success("ttl");
        remaining
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{NoopMetrics, OperationOutcome, PrometheusCacheMetrics};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use serde_json::json;

    fn layer(config: MemoryLayerConfig) -> MemoryLayer {
        MemoryLayer::new(config, NoopMetrics::shared())
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let memory = layer(MemoryLayerConfig::default());

        memory
            .set("images:a", CacheValue::from(Bytes::from_static(b"png")), None)
            .await
            .unwrap();
        assert!(memory.exists("images:a").await);
        assert_eq!(
            memory.get("images:a").await.unwrap().as_bytes().unwrap().as_ref(),
            b"png"
        );

        memory.delete("images:a").await.unwrap();
        assert!(!memory.exists("images:a").await);
        assert!(memory.get("images:a").await.is_none());
        assert_eq!(memory.memory_usage().used_bytes, 0);
    }

    #[tokio::test]
    async fn test_hit_rate() {
        let memory = layer(MemoryLayerConfig::default());
        memory.set("k", json!(1).into(), None).await.unwrap();

        for _ in 0..3 {
            assert!(memory.get("k").await.is_some());
        }
        assert!(memory.get("missing").await.is_none());

        let stats = memory.stats().await;
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.keys, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_expiry() {
        let memory = layer(MemoryLayerConfig {
            check_period: 0,
            ..Default::default()
        });
        memory.set("short", json!("v").into(), Some(1)).await.unwrap();
        assert!(memory.ttl("short").await.unwrap() <= 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!memory.exists("short").await);
        assert!(memory.get("short").await.is_none());
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let memory = layer(MemoryLayerConfig {
            default_ttl: 0,
            ..Default::default()
        });
        memory.set("a", json!(1).into(), None).await.unwrap();
        memory.set("b", json!(1).into(), Some(0)).await.unwrap();
        assert_eq!(memory.ttl("a").await, None);
        assert_eq!(memory.ttl("b").await, None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let memory = layer(MemoryLayerConfig {
            check_period: 0,
            ..Default::default()
        });
        memory.set("gone", json!(1).into(), Some(1)).await.unwrap();
        memory.set("kept", json!(1).into(), Some(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(memory.purge_expired(), 1);
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_background_sweep() {
        let memory = layer(MemoryLayerConfig {
            check_period: 1,
            ..Default::default()
        });
        memory.set("gone", json!(1).into(), Some(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2300)).await;
        assert_eq!(memory.len(), 0);
    }

    #[tokio::test]
    async fn test_max_keys_propagates() {
        let memory = layer(MemoryLayerConfig {
            max_keys: 2,
            ..Default::default()
        });
        memory.set("a", json!(1).into(), None).await.unwrap();
        memory.set("b", json!(1).into(), None).await.unwrap();

        // Overwriting an existing key is allowed
        memory.set("a", json!(2).into(), None).await.unwrap();

        let result = memory.set("c", json!(1).into(), None).await;
        assert_matches!(result, Err(Error::CacheFull { .. }));
        assert_eq!(memory.stats().await.errors, 1);
    }

    #[tokio::test]
    async fn test_max_size_propagates() {
        let memory = layer(MemoryLayerConfig {
            max_size: 16,
            ..Default::default()
        });
        let big = CacheValue::from(vec![0u8; 64]);
        assert_matches!(memory.set("big", big, None).await, Err(Error::CacheFull { .. }));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_tracks_size() {
        let memory = layer(MemoryLayerConfig::default());
        memory.set("k", CacheValue::from(vec![0u8; 10]), None).await.unwrap();
        memory.set("k", CacheValue::from(vec![0u8; 4]), None).await.unwrap();
        assert_eq!(memory.memory_usage().used_bytes, 4 + 1);
        assert_eq!(memory.len(), 1);

        memory.clear().await.unwrap();
        assert_eq!(memory.memory_usage().used_bytes, 0);
        assert!(memory.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_racing_writers_keeps_byte_count() {
        let memory = Arc::new(layer(MemoryLayerConfig::default()));

        let mut writers = Vec::new();
        for task in 0..8 {
            let memory = Arc::clone(&memory);
            writers.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("images:{}-{}", task, i);
                    memory
                        .set(&key, CacheValue::from(vec![0u8; 100]), None)
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        let clearer = {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move {
                for _ in 0..20 {
                    memory.clear().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        for writer in writers {
            writer.await.unwrap();
        }
        clearer.await.unwrap();

        for task in 0..8 {
            for i in 0..50 {
                memory.delete(&format!("images:{}-{}", task, i)).await.unwrap();
            }
        }
        assert!(memory.is_empty());
        assert_eq!(memory.memory_usage().used_bytes, 0);

        memory
            .set("images:after", CacheValue::from(vec![0u8; 100]), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lookups_report_to_sink() {
        let metrics = Arc::new(PrometheusCacheMetrics::new().unwrap());
        let memory = MemoryLayer::new(MemoryLayerConfig::default(), metrics.clone());
        memory.set("k", json!(1).into(), Some(60)).await.unwrap();

        assert!(memory.exists("k").await);
        assert!(memory.ttl("k").await.unwrap() <= 60);

        assert_eq!(metrics.operation_count("exists", "memory", OperationOutcome::Success), 1);
        assert_eq!(metrics.operation_count("ttl", "memory", OperationOutcome::Success), 1);
    }
}
