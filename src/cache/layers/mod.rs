//! Cache Layers
//!
//! The uniform contract every physical cache backend implements, and the
//! three built-in layers.

mod file;
mod memory;
mod remote;

pub use file::{entry_file_name, CleanupReport, FileLayer, FileLayerConfig};
pub use memory::{MemoryLayer, MemoryLayerConfig, MemoryUsage};
pub use remote::{ConnectionStatus, RemoteLayer, RemoteLayerConfig, RemoteMemoryUsage};

use crate::cache::entry::CacheValue;
use crate::cache::metrics::{CacheLayerStats, LayerCounters};
use crate::error::Result;
use crate::telemetry::{MetricsSinkRef, OperationOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Priority of the in-process memory layer
pub const MEMORY_PRIORITY: u32 = 1;
/// Priority of the shared remote layer
pub const REMOTE_PRIORITY: u32 = 2;
/// Priority of the on-disk file layer
pub const FILE_PRIORITY: u32 = 3;

// =============================================================================
// Layer Descriptor
// =============================================================================

/// Name and priority of a layer; lower priority is checked and written first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub name: String,
    pub priority: u32,
}

// =============================================================================
// CacheLayer Trait
// =============================================================================

/// Contract shared by all cache layers
///
/// `get` and `exists` never fail: a backend error reads as a miss. Whether
/// `set`, `delete` and `clear` surface backend errors is up to the layer.
/// Every operation except `health_check` reports its outcome to the
/// metrics sink.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Layer name used in logs and metrics
    fn name(&self) -> &str;

    /// Lookup/write order of this layer
    fn priority(&self) -> u32;

    /// Name and priority together
    fn descriptor(&self) -> LayerDescriptor {
        LayerDescriptor {
            name: self.name().to_string(),
            priority: self.priority(),
        }
    }

    /// Get a value, or `None` on miss, expiry or backend error
    async fn get(&self, key: &str) -> Option<CacheValue>;

    /// Store a value; `ttl` of `None` applies the layer's default policy
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<u64>) -> Result<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a live entry exists
    async fn exists(&self, key: &str) -> bool;

    /// Remove every entry owned by this layer
    async fn clear(&self) -> Result<()>;

    /// Current statistics
    async fn stats(&self) -> CacheLayerStats;

    /// Remaining lifetime of a key in seconds, when the layer can tell
    async fn ttl(&self, _key: &str) -> Option<u64> {
        None
    }

    /// Whether the backend is currently usable
    async fn health_check(&self) -> bool;
}

/// Shared handle to a cache layer
pub type CacheLayerRef = Arc<dyn CacheLayer>;

// =============================================================================
// Layer Instruments
// =============================================================================

/// Counters plus metrics reporting for one layer
pub(crate) struct LayerInstruments {
    name: &'static str,
    counters: LayerCounters,
    sink: MetricsSinkRef,
}

impl LayerInstruments {
    pub(crate) fn new(name: &'static str, sink: MetricsSinkRef) -> Self {
        Self {
            name,
            counters: LayerCounters::new(),
            sink,
        }
    }

    pub(crate) fn counters(&self) -> &LayerCounters {
        &self.counters
    }

    pub(crate) fn hit(&self, operation: &str) {
        self.counters.record_hit();
        self.report(operation, OperationOutcome::Hit);
    }

    pub(crate) fn miss(&self, operation: &str) {
        self.counters.record_miss();
        self.report(operation, OperationOutcome::Miss);
    }

    pub(crate) fn success(&self, operation: &str) {
        self.report(operation, OperationOutcome::Success);
    }

    pub(crate) fn failure(&self, operation: &str) {
        self.counters.record_error();
        self.report(operation, OperationOutcome::Error);
    }

    /// Snapshot the counters and publish the hit ratio
    pub(crate) fn stats(&self, keys: u64, memory_usage_bytes: Option<u64>) -> CacheLayerStats {
        let stats = self.counters.snapshot(keys, memory_usage_bytes);
        self.sink.update_cache_hit_ratio(self.name, stats.hit_rate);
        stats
    }

    fn report(&self, operation: &str, outcome: OperationOutcome) {
        self.counters.record_operation();
        self.sink.record_cache_operation(operation, self.name, outcome);
    }
}
