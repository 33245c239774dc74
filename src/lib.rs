//! Media Cache - Multi-Layer Cache for Image Delivery
//!
//! The caching core of an image-delivery acceleration service: in-process
//! memory, a shared Redis cache and on-disk files composed behind a single
//! coordinator, plus a popularity-driven warming service.
//!
//! # Modules
//!
//! - [`cache`]: Layers, coordinator, key strategy and warming
//! - [`config`]: YAML configuration
//! - [`telemetry`]: Metrics sinks
//! - [`error`]: Error types and handling

pub mod cache;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{
    CacheKeyStrategy, CacheLayer, CacheLayerStats, CacheValue, CacheWarmingService, FileLayer,
    MemoryLayer, MultiLayerCache, RemoteLayer, WarmupScheduler,
};

pub use config::{AppConfig, CacheConfig};

pub use error::{Error, Result};

pub use telemetry::{CacheMetricsSink, MetricsSinkRef, NoopMetrics, PrometheusCacheMetrics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
