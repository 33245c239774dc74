//! Cache Telemetry
//!
//! The metrics sink every layer reports to, with a Prometheus-backed
//! implementation for the daemon and a no-op one for embedding and tests.

use crate::error::{Error, Result};
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use std::fmt;
use std::sync::Arc;

/// Outcome of a single cache operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
    Hit,
    Miss,
    Success,
    Error,
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Hit => write!(f, "hit"),
            OperationOutcome::Miss => write!(f, "miss"),
            OperationOutcome::Success => write!(f, "success"),
            OperationOutcome::Error => write!(f, "error"),
        }
    }
}

/// Sink for cache operation metrics
pub trait CacheMetricsSink: Send + Sync {
    /// Record one operation against a layer
    fn record_cache_operation(&self, operation: &str, layer: &str, outcome: OperationOutcome);

    /// Publish the current hit ratio of a layer
    fn update_cache_hit_ratio(&self, layer: &str, ratio: f64);
}

/// Shared handle to a metrics sink
pub type MetricsSinkRef = Arc<dyn CacheMetricsSink>;

// =============================================================================
// No-op Sink
// =============================================================================

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl NoopMetrics {
    /// Create a shared no-op sink
    pub fn shared() -> MetricsSinkRef {
        Arc::new(NoopMetrics)
    }
}

impl CacheMetricsSink for NoopMetrics {
    fn record_cache_operation(&self, _operation: &str, _layer: &str, _outcome: OperationOutcome) {}

    fn update_cache_hit_ratio(&self, _layer: &str, _ratio: f64) {}
}

// =============================================================================
// Prometheus Sink
// =============================================================================

/// Prometheus-backed metrics sink
#[derive(Clone)]
pub struct PrometheusCacheMetrics {
    registry: Registry,
    operations: IntCounterVec,
    hit_ratio: GaugeVec,
}

impl PrometheusCacheMetrics {
    /// Create the sink and register its collectors in a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the sink registering into an existing registry
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new("media_cache_operations_total", "Cache operations by layer and outcome"),
            &["operation", "layer", "outcome"],
        )
        .map_err(metrics_error)?;

        let hit_ratio = GaugeVec::new(
            Opts::new("media_cache_hit_ratio", "Cache hit ratio per layer"),
            &["layer"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(hit_ratio.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            hit_ratio,
        })
    }

    /// Registry to expose on the metrics endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current counter value, mainly for health reporting
    pub fn operation_count(&self, operation: &str, layer: &str, outcome: OperationOutcome) -> u64 {
        self.operations
            .with_label_values(&[operation, layer, &outcome.to_string()])
            .get()
    }
}

impl CacheMetricsSink for PrometheusCacheMetrics {
    fn record_cache_operation(&self, operation: &str, layer: &str, outcome: OperationOutcome) {
        self.operations
            .with_label_values(&[operation, layer, &outcome.to_string()])
            .inc();
    }

    fn update_cache_hit_ratio(&self, layer: &str, ratio: f64) {
        self.hit_ratio.with_label_values(&[layer]).set(ratio);
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_sink_counts() {
        let metrics = PrometheusCacheMetrics::new().unwrap();
        metrics.record_cache_operation("get", "memory", OperationOutcome::Hit);
        metrics.record_cache_operation("get", "memory", OperationOutcome::Hit);
        metrics.record_cache_operation("get", "redis", OperationOutcome::Error);
        metrics.update_cache_hit_ratio("memory", 0.5);

        assert_eq!(metrics.operation_count("get", "memory", OperationOutcome::Hit), 2);
        assert_eq!(metrics.operation_count("get", "redis", OperationOutcome::Error), 1);
        assert_eq!(metrics.operation_count("set", "file", OperationOutcome::Success), 0);

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "media_cache_hit_ratio"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(OperationOutcome::Success.to_string(), "success");
        assert_eq!(OperationOutcome::Miss.to_string(), "miss");
    }
}
