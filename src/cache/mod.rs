//! Multi-Layer Caching System
//!
//! Three independently failing layers behind one coordinator:
//! - **Memory**: in-process DashMap, fastest, write failures surface
//! - **Remote**: shared Redis, optional infrastructure, every failure swallowed
//! - **File**: one JSON document per key on local disk
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Multi-Layer Cache Coordinator                     │
//! │        read-through + promotion  ·  write-through  ·  stats             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────────┐   │
//! │  │   Memory     │  │   Remote     │  │          File                │   │
//! │  │  priority 1  │  │  priority 2  │  │       priority 3             │   │
//! │  │  (DashMap)   │  │  (Redis)     │  │   ({directory}/*.json)       │   │
//! │  └──────▲───────┘  └──────────────┘  └──────────────────────────────┘   │
//! │         │                                                                │
//! │  ┌──────┴──────────────┐     ┌──────────────────┐                        │
//! │  │ Cache Warming       │◄────┤ Warmup Scheduler │ (cron)                 │
//! │  │ Service             │     └──────────────────┘                        │
//! │  └─────────────────────┘                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use media_cache::cache::{MultiLayerCache, PromotionConfig, CacheValue};
//!
//! let cache = MultiLayerCache::new(vec![memory, remote, file], PromotionConfig::default());
//!
//! cache.set("images", "cat.jpg", CacheValue::from(bytes), Some(3600)).await?;
//!
//! // Searches memory -> remote -> file, promoting on a slower hit
//! if let Some(value) = cache.get("images", "cat.jpg").await {
//!     println!("{} bytes", value.size_bytes());
//! }
//!
//! let stats = cache.stats().await;
//! println!("Hit rate: {:.2}%", stats.aggregate.hit_rate * 100.0);
//! ```

pub mod backend;
pub mod coordinator;
pub mod entry;
pub mod events;
pub mod key;
pub mod layers;
pub mod metrics;
pub mod scheduler;
pub mod warming;

// Re-export main types
pub use backend::{InMemoryRemoteStore, RedisStore, RemoteMemoryInfo, RemoteStore, RemoteStoreRef};
pub use coordinator::{
    LayerHealth, LayerStatsReport, MultiLayerCache, MultiLayerStats, PromotionConfig,
    PromotionTtlPolicy,
};
pub use entry::{CacheEntry, CacheValue};
pub use events::CacheEvent;
pub use key::{CacheKeyStrategy, ParsedKey};
pub use layers::{
    CacheLayer, CacheLayerRef, CleanupReport, ConnectionStatus, FileLayer, FileLayerConfig,
    LayerDescriptor, MemoryLayer, MemoryLayerConfig, MemoryUsage, RemoteLayer, RemoteLayerConfig,
    RemoteMemoryUsage,
};
pub use metrics::{CacheLayerStats, LayerCounters};
pub use scheduler::WarmupScheduler;
pub use warming::{
    CacheWarmingService, FileAccessInfo, WarmingConfig, WarmingState, WarmupReport, WarmupStats,
};
