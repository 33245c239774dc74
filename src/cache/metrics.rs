//! Cache Layer Metrics
//!
//! Cache-line aligned counters owned by each layer, and the statistics
//! snapshots derived from them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Layer Counters (Cache-Line Aligned)
// =============================================================================

/// Counters for a single cache layer, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct LayerCounters {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of backend errors
    pub errors: AtomicU64,
    /// Number of backend operations attempted
    pub operations: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<LayerCounters>() <= CACHE_LINE_SIZE);

impl Default for LayerCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            operations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current error count
    #[inline]
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Get current operation count
    #[inline]
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Build a stats snapshot with the layer-provided key count and footprint
    pub fn snapshot(&self, keys: u64, memory_usage_bytes: Option<u64>) -> CacheLayerStats {
        CacheLayerStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            keys,
            memory_usage_bytes,
            self.errors.load(Ordering::Relaxed),
        )
    }
}

// =============================================================================
// Layer Statistics Snapshot
// =============================================================================

/// Point-in-time statistics for one layer (or an aggregate of layers)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheLayerStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: u64,
    /// Always `hits / (hits + misses)`, or 0 with no lookups
    pub hit_rate: f64,
    pub memory_usage_bytes: Option<u64>,
    pub errors: u64,
}

impl CacheLayerStats {
    /// Create a snapshot, deriving the hit rate
    pub fn new(
        hits: u64,
        misses: u64,
        keys: u64,
        memory_usage_bytes: Option<u64>,
        errors: u64,
    ) -> Self {
        Self {
            hits,
            misses,
            keys,
            hit_rate: hit_rate(hits, misses),
            memory_usage_bytes,
            errors,
        }
    }

    /// Zeroed snapshot carrying only an error count
    pub fn errored(errors: u64) -> Self {
        Self::new(0, 0, 0, None, errors)
    }

    /// Sum snapshots; the hit rate is recomputed from the summed counters
    pub fn aggregate<'a>(stats: impl IntoIterator<Item = &'a CacheLayerStats>) -> Self {
        let mut hits = 0;
        let mut misses = 0;
        let mut keys = 0;
        let mut errors = 0;
        let mut memory: Option<u64> = None;

        for s in stats {
            hits += s.hits;
            misses += s.misses;
            keys += s.keys;
            errors += s.errors;
            if let Some(bytes) = s.memory_usage_bytes {
                memory = Some(memory.unwrap_or(0) + bytes);
            }
        }

        Self::new(hits, misses, keys, memory, errors)
    }
}

/// Hit ratio (0.0 to 1.0)
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
