//! Remote Store Backends
//!
//! The shared key/value store behind the remote layer. Values cross this
//! boundary as text; the layer owns encoding and fault isolation.

mod in_memory;
mod redis_store;

pub use in_memory::InMemoryRemoteStore;
pub use redis_store::{redis_url, RedisStore};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// RemoteStore Trait
// =============================================================================

/// Text key/value store with expiring writes
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Plain write, no expiry
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Expiring write
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime in seconds; `None` for missing keys or keys without expiry
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    /// Remove every key in the selected database
    async fn flush(&self) -> Result<()>;

    /// Number of keys in the selected database
    async fn dbsize(&self) -> Result<u64>;

    async fn memory_info(&self) -> Result<RemoteMemoryInfo>;

    /// Liveness probe, replies `"PONG"`
    async fn ping(&self) -> Result<String>;
}

/// Shared handle to a remote store
pub type RemoteStoreRef = Arc<dyn RemoteStore>;

// =============================================================================
// Memory Info
// =============================================================================

/// Memory figures reported by the remote store
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMemoryInfo {
    pub used_bytes: u64,
    pub peak_bytes: u64,
    pub fragmentation_ratio: f64,
}

impl RemoteMemoryInfo {
    /// Parse the `INFO memory` section (`field:value` lines)
    pub fn parse(info: &str) -> Self {
        let mut parsed = Self::default();
        for line in info.lines() {
            let Some((field, value)) = line.trim().split_once(':') else {
                continue;
            };
            match field {
                "used_memory" => parsed.used_bytes = value.parse().unwrap_or(0),
                "used_memory_peak" => parsed.peak_bytes = value.parse().unwrap_or(0),
                "mem_fragmentation_ratio" => {
                    parsed.fragmentation_ratio = value.parse().unwrap_or(0.0)
                }
                _ => {}
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_info() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n\
                    used_memory_peak:2097152\r\nmem_fragmentation_ratio:1.25\r\n";
        let parsed = RemoteMemoryInfo::parse(info);
        assert_eq!(parsed.used_bytes, 1_048_576);
        assert_eq!(parsed.peak_bytes, 2_097_152);
        assert!((parsed.fragmentation_ratio - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_garbage_is_zeroed() {
        assert_eq!(RemoteMemoryInfo::parse("nonsense"), RemoteMemoryInfo::default());
    }
}
