//! In-Memory Remote Store
//!
//! A process-local test double for the shared store. Availability and
//! latency can be toggled to exercise the remote layer's fault isolation.

use crate::cache::backend::{RemoteMemoryInfo, RemoteStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// In-memory `RemoteStore`
pub struct InMemoryRemoteStore {
    store: RwLock<HashMap<String, StoredValue>>,
    available: AtomicBool,
    /// Artificial delay applied to every call, in milliseconds
    latency_ms: AtomicU64,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Check if available
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Delay every subsequent call (for testing)
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_available() {
            return Err(Error::RemoteUnavailable("in-memory store".to_string()));
        }
        Ok(())
    }

    fn live_value(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        self.store
            .read()
            .get(key)
            .filter(|v| v.is_live(now))
            .cloned()
    }

    /// Write a value, dropping expired entries on the way
    fn insert(&self, key: &str, value: &str, expires_at: Option<Instant>) {
        let now = Instant::now();
        let mut store = self.store.write();
        store.retain(|_, v| v.is_live(now));
        store.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter().await?;
        Ok(self.live_value(key).map(|v| v.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.enter().await?;
        self.insert(key, value, None);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.enter().await?;
        self.insert(key, value, Some(Instant::now() + Duration::from_secs(ttl_secs)));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.enter().await?;
        self.store.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        Ok(self.live_value(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        self.enter().await?;
        let now = Instant::now();
        Ok(self
            .live_value(key)
            .and_then(|v| v.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    async fn flush(&self) -> Result<()> {
        self.enter().await?;
        self.store.write().clear();
        Ok(())
    }

    async fn dbsize(&self) -> Result<u64> {
        self.enter().await?;
        let now = Instant::now();
        Ok(self.store.read().values().filter(|v| v.is_live(now)).count() as u64)
    }

    async fn memory_info(&self) -> Result<RemoteMemoryInfo> {
        self.enter().await?;
        let used: u64 = self
            .store
            .read()
            .iter()
            .map(|(k, v)| (k.len() + v.value.len()) as u64)
            .sum();
        Ok(RemoteMemoryInfo {
            used_bytes: used,
            peak_bytes: used,
            fragmentation_ratio: 1.0,
        })
    }

    async fn ping(&self) -> Result<String> {
        self.enter().await?;
        Ok("PONG".to_string())
    }
}
