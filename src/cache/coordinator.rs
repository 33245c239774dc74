//! Multi-Layer Cache Coordinator
//!
//! Composes the layers into one logical cache: read-through with promotion,
//! write-through with per-layer fault isolation, fan-out invalidation and
//! aggregated statistics. There is no cross-layer atomicity; layers converge
//! eventually.

use crate::cache::entry::CacheValue;
use crate::cache::events::CacheEvent;
use crate::cache::key::CacheKeyStrategy;
use crate::cache::layers::{CacheLayer, CacheLayerRef, LayerDescriptor};
use crate::cache::metrics::CacheLayerStats;
use crate::error::{Error, Result};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// TTL given to values copied into faster layers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionTtlPolicy {
    /// Remaining TTL reported by the layer that hit, falling back to the default
    #[default]
    Remaining,
    /// Always the configured default
    Default,
}

/// Promotion settings (`cache.promotion`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromotionConfig {
    pub ttl_policy: PromotionTtlPolicy,
    /// Seconds
    pub default_ttl: u64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            ttl_policy: PromotionTtlPolicy::Remaining,
            default_ttl: 3600,
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Statistics of one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStatsReport {
    #[serde(flatten)]
    pub layer: LayerDescriptor,
    pub stats: CacheLayerStats,
}

/// Per-layer statistics plus their aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiLayerStats {
    pub layers: Vec<LayerStatsReport>,
    pub aggregate: CacheLayerStats,
}

impl MultiLayerStats {
    /// Stats of the named layer
    pub fn layer(&self, name: &str) -> Option<&CacheLayerStats> {
        self.layers
            .iter()
            .find(|l| l.layer.name == name)
            .map(|l| &l.stats)
    }
}

/// Liveness of one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerHealth {
    #[serde(flatten)]
    pub layer: LayerDescriptor,
    pub healthy: bool,
}

// =============================================================================
// Multi-Layer Cache
// =============================================================================

/// Coordinator over an ordered set of cache layers
pub struct MultiLayerCache {
    /// Sorted by ascending priority
    layers: Vec<CacheLayerRef>,
    promotion: PromotionConfig,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl MultiLayerCache {
    /// Create a coordinator; layers are ordered by priority
    pub fn new(mut layers: Vec<CacheLayerRef>, promotion: PromotionConfig) -> Self {
        layers.sort_by_key(|l| l.priority());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            layers = ?layers.iter().map(|l| l.name().to_string()).collect::<Vec<_>>(),
            ttl_policy = ?promotion.ttl_policy,
            "Multi-layer cache initialized"
        );

        Self {
            layers,
            promotion,
            event_tx,
        }
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    /// Layers in lookup order
    pub fn layers(&self) -> &[CacheLayerRef] {
        &self.layers
    }

    /// Look up a layer by name
    pub fn layer(&self, name: &str) -> Option<&CacheLayerRef> {
        self.layers.iter().find(|l| l.name() == name)
    }

    fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Read through the layers, fastest first
    ///
    /// On a hit below the fastest layer the value is copied into every faster
    /// layer in the background; the caller does not wait for it.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<CacheValue> {
        let cache_key = CacheKeyStrategy::generate_key(namespace, key, None);

        for (index, layer) in self.layers.iter().enumerate() {
            let Some(value) = layer.get(&cache_key).await else {
                continue;
            };

            debug!(key = %cache_key, layer = layer.name(), "Cache hit");
            self.emit_event(CacheEvent::Hit {
                key: cache_key.clone(),
                layer: layer.name().to_string(),
            });

            if index > 0 {
                self.promote(cache_key, value.clone(), index);
            }
            return Some(value);
        }

        debug!(key = %cache_key, "Cache miss");
        self.emit_event(CacheEvent::Miss { key: cache_key });
        None
    }

    fn promote(&self, key: String, value: CacheValue, hit_index: usize) {
        let source = self.layers[hit_index].clone();
        let targets: Vec<CacheLayerRef> = self.layers[..hit_index].to_vec();
        let promotion = self.promotion.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let ttl = match promotion.ttl_policy {
                // A zero TTL would mean "no expiry" downstream
                PromotionTtlPolicy::Remaining => source
                    .ttl(&key)
                    .await
                    .map(|remaining| remaining.max(1))
                    .unwrap_or(promotion.default_ttl),
                PromotionTtlPolicy::Default => promotion.default_ttl,
            };
            let from_layer = source.name().to_string();

            for target in targets {
                let to_layer = target.name().to_string();
                match target.set(&key, value.clone(), Some(ttl)).await {
                    Ok(()) => {
                        debug!(key = %key, from = %from_layer, to = %to_layer, ttl, "Promoted cache entry");
                        let _ = event_tx.send(CacheEvent::Promoted {
                            key: key.clone(),
                            from_layer: from_layer.clone(),
                            to_layer,
                        });
                    }
                    Err(e) => {
                        warn!(key = %key, layer = %to_layer, error = %e, "Cache promotion failed");
                        let _ = event_tx.send(CacheEvent::PromotionFailed {
                            key: key.clone(),
                            to_layer,
                            error: e.to_string(),
                        });
                    }
                }
            }
        });
    }

    /// Write through every layer in priority order
    ///
    /// Only a failure of the fastest layer is returned; every layer is
    /// attempted regardless.
    pub async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: CacheValue,
        ttl: Option<u64>,
    ) -> Result<()> {
        let cache_key = CacheKeyStrategy::generate_key(namespace, key, None);
        let mut primary_error = None;

        for (index, layer) in self.layers.iter().enumerate() {
            if let Err(e) = layer.set(&cache_key, value.clone(), ttl).await {
                warn!(key = %cache_key, layer = layer.name(), error = %e, "Cache write failed");
                self.emit_event(CacheEvent::WriteFailed {
                    key: cache_key.clone(),
                    layer: layer.name().to_string(),
                    error: e.to_string(),
                });
                if index == 0 {
                    primary_error = Some(e);
                }
            }
        }

        match primary_error {
            Some(e) => Err(e),
            None => {
                debug!(key = %cache_key, "Cache entry written through");
                Ok(())
            }
        }
    }

    /// Typed read; a stored value that does not decode as `T` is a miss
    pub async fn get_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let value = self.get(namespace, key).await?;
        match value.deserialize() {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(namespace, key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Typed write
    pub async fn set_json<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let value = CacheValue::from_serializable(value)?;
        self.set(namespace, key, value, ttl).await
    }

    /// Remove a key from every layer, best-effort
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let cache_key = CacheKeyStrategy::generate_key(namespace, key, None);
        for layer in &self.layers {
            if let Err(e) = layer.delete(&cache_key).await {
                warn!(key = %cache_key, layer = layer.name(), error = %e, "Cache delete failed");
            }
        }
        Ok(())
    }

    /// Clear every layer, best-effort
    pub async fn clear(&self) -> Result<()> {
        let mut failed = Vec::new();
        for layer in &self.layers {
            if let Err(e) = layer.clear().await {
                warn!(layer = layer.name(), error = %e, "Cache clear failed");
                failed.push(layer.name().to_string());
            }
        }

        self.emit_event(CacheEvent::Cleared);
        if failed.is_empty() {
            info!("All cache layers cleared");
        } else {
            info!(failed = ?failed, "Cache layers cleared with failures");
        }
        Ok(())
    }

    /// Per-layer statistics and their aggregate, layers queried concurrently
    pub async fn stats(&self) -> MultiLayerStats {
        let layers: Vec<LayerStatsReport> = join_all(self.layers.iter().map(|layer| async move {
            LayerStatsReport {
                layer: layer.descriptor(),
                stats: layer.stats().await,
            }
        }))
        .await;
        let aggregate = CacheLayerStats::aggregate(layers.iter().map(|l| &l.stats));
        MultiLayerStats { layers, aggregate }
    }

    /// Liveness of every layer
    pub async fn health_check(&self) -> Vec<LayerHealth> {
        join_all(self.layers.iter().map(|layer| async move {
            LayerHealth {
                layer: layer.descriptor(),
                healthy: layer.health_check().await,
            }
        }))
        .await
    }

    /// Whether the fastest layer is usable; slower layers are optional
    pub async fn is_healthy(&self) -> bool {
        match self.layers.first() {
            Some(layer) => layer.health_check().await,
            None => false,
        }
    }

    /// The fastest layer, used for warming
    pub fn primary_layer(&self) -> Result<CacheLayerRef> {
        self.layers
            .first()
            .cloned()
            .ok_or_else(|| Error::Configuration("no cache layers configured".to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
