//! File Layer
//!
//! One JSON document per key under the cache directory:
//! `{directory}/{sanitizedKey}.json` holding `{value, timestamp, ttl}`.
//! The directory is shared mutable state with no locking; concurrent writers
//! of the same key race and the last one wins. IO and parse failures are
//! counted and logged, never propagated.

use crate::cache::entry::{now_millis, CacheEntry, CacheValue};
use crate::cache::layers::{CacheLayer, LayerInstruments, FILE_PRIORITY};
use crate::cache::metrics::CacheLayerStats;
use crate::error::Result;
use crate::telemetry::MetricsSinkRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LAYER_NAME: &str = "file";
const ENTRY_EXTENSION: &str = "json";
const HEALTH_PROBE: &str = ".health_check";

// =============================================================================
// File Layer Configuration
// =============================================================================

/// Configuration for the file layer (`cache.file`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileLayerConfig {
    /// Cache directory, created recursively when absent
    pub directory: PathBuf,
    /// Maximum on-disk footprint in bytes (0 = unlimited)
    pub max_size: u64,
    /// Seconds between cleanup passes (0 = no background cleanup)
    pub cleanup_interval: u64,
}

impl Default for FileLayerConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache"),
            max_size: 1024 * 1024 * 1024, // 1 GB
            cleanup_interval: 3600,
        }
    }
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Entries removed because their TTL elapsed
    pub expired: u64,
    /// Entries removed to get back under `maxSize`
    pub evicted: u64,
    /// Footprint after the pass
    pub remaining_bytes: u64,
}

/// Map a cache key to its entry file name
///
/// Characters outside `[A-Za-z0-9_\-.:]` become `_`.
pub fn entry_file_name(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.{}", sanitized, ENTRY_EXTENSION)
}

// =============================================================================
// File Store
// =============================================================================

struct EntryFile {
    path: PathBuf,
    size: u64,
    timestamp: i64,
    expired: bool,
}

/// Directory access shared with the cleanup task
struct FileStore {
    directory: PathBuf,
    max_size: u64,
}

impl FileStore {
    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(entry_file_name(key))
    }

    async fn entry_paths(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_entry = path
                .extension()
                .map(|e| e == ENTRY_EXTENSION)
                .unwrap_or(false);
            if is_entry && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn footprint(&self) -> std::io::Result<(u64, u64)> {
        let mut count = 0;
        let mut bytes = 0;
        for path in self.entry_paths().await? {
            if let Ok(meta) = fs::metadata(&path).await {
                count += 1;
                bytes += meta.len();
            }
        }
        Ok((count, bytes))
    }

    async fn read_entry(path: &Path) -> Option<CacheEntry> {
        let raw = fs::read_to_string(path).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    async fn cleanup(&self) -> std::io::Result<CleanupReport> {
        let now = now_millis();
        let mut report = CleanupReport::default();
        let mut live = Vec::new();

        for path in self.entry_paths().await? {
            let Ok(meta) = fs::metadata(&path).await else {
                continue;
            };
            // Unreadable documents are oldest and go first under pressure
            let (timestamp, expired) = match Self::read_entry(&path).await {
                Some(entry) => (entry.timestamp, entry.is_expired_at(now)),
                None => (i64::MIN, false),
            };
            live.push(EntryFile {
                path,
                size: meta.len(),
                timestamp,
                expired,
            });
        }

        let mut total: u64 = 0;
        let mut kept = Vec::with_capacity(live.len());
        for file in live {
            if file.expired {
                if remove_quietly(&file.path).await {
                    report.expired += 1;
                }
            } else {
                total += file.size;
                kept.push(file);
            }
        }

        if self.max_size > 0 && total > self.max_size {
            kept.sort_by_key(|f| f.timestamp);
            for file in kept {
                if total <= self.max_size {
                    break;
                }
                if remove_quietly(&file.path).await {
                    total = total.saturating_sub(file.size);
                    report.evicted += 1;
                }
            }
        }

        report.remaining_bytes = total;
        Ok(report)
    }
}

async fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(layer = LAYER_NAME, path = %path.display(), error = %e, "Failed to remove cache file");
            false
        }
    }
}

// =============================================================================
// File Layer
// =============================================================================

/// On-disk cache layer
pub struct FileLayer {
    store: Arc<FileStore>,
    instruments: LayerInstruments,
    cleaner: CancellationToken,
}

impl FileLayer {
    /// Create the layer, creating the cache directory if needed
    pub async fn new(config: FileLayerConfig, metrics: MetricsSinkRef) -> Result<Self> {
        fs::create_dir_all(&config.directory).await?;

        let layer = Self {
            store: Arc::new(FileStore {
                directory: config.directory,
                max_size: config.max_size,
            }),
            instruments: LayerInstruments::new(LAYER_NAME, metrics),
            cleaner: CancellationToken::new(),
        };
        layer.start_cleanup(config.cleanup_interval);

        info!(
            layer = LAYER_NAME,
            directory = %layer.store.directory.display(),
            max_size = layer.store.max_size,
            "File cache layer initialized"
        );
        Ok(layer)
    }

    fn start_cleanup(&self, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }

        let store = Arc::clone(&self.store);
        let token = self.cleaner.clone();
        let period = Duration::from_secs(interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.cleanup().await {
                            Ok(report) => debug!(
                                layer = LAYER_NAME,
                                expired = report.expired,
                                evicted = report.evicted,
                                "Cache directory cleaned"
                            ),
                            Err(e) => warn!(layer = LAYER_NAME, error = %e, "Cache cleanup failed"),
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    /// Cache directory
    pub fn directory(&self) -> &Path {
        &self.store.directory
    }

    /// Remove expired entries, then the oldest until under `maxSize`
    pub async fn cleanup(&self) -> CleanupReport {
        match self.store.cleanup().await {
            Ok(report) => {
                self.instruments.success("cleanup");
                report
            }
            Err(e) => {
                self.instruments.failure("cleanup");
                warn!(layer = LAYER_NAME, error = %e, "Cache cleanup failed");
                CleanupReport::default()
            }
        }
    }

    /// Read a live entry; expired entries are deleted and read as absent
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.store.path_for(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_str(&raw)?;
        if entry.is_expired() {
            remove_quietly(&path).await;
            debug!(layer = LAYER_NAME, key = %key, "Removed expired cache file");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// `load` with failures counted and logged
    async fn lookup(&self, key: &str, operation: &str) -> Option<CacheEntry> {
        match self.load(key).await {
            Ok(entry) => {
                self.instruments.success(operation);
                entry
            }
            Err(e) => {
                self.instruments.failure(operation);
                warn!(layer = LAYER_NAME, key = %key, error = %e, "Failed to read cache file");
                None
            }
        }
    }
}

impl Drop for FileLayer {
    fn drop(&mut self) {
        self.cleaner.cancel();
    }
}

#[async_trait]
impl CacheLayer for FileLayer {
    fn name(&self) -> &str {
        LAYER_NAME
    }

    fn priority(&self) -> u32 {
        FILE_PRIORITY
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        let entry = match self.load(key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.instruments.failure("get");
                warn!(layer = LAYER_NAME, key = %key, error = %e, "Failed to read cache file");
                None
            }
        };
        match entry {
            Some(entry) => {
                self.instruments.hit("get");
                Some(entry.cache_value())
            }
            None => {
                self.instruments.miss("get");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<u64>) -> Result<()> {
        let entry = CacheEntry::new(&value, ttl.filter(|t| *t > 0));
        let payload = match serde_json::to_vec(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                self.instruments.failure("set");
                warn!(layer = LAYER_NAME, key = %key, error = %e, "Failed to encode cache entry");
                return Ok(());
            }
        };

        match fs::write(self.store.path_for(key), &payload).await {
            Ok(()) => {
                self.instruments.success("set");
                debug!(layer = LAYER_NAME, key = %key, size = payload.len(), "Stored cache entry");
            }
            Err(e) => {
                self.instruments.failure("set");
                warn!(layer = LAYER_NAME, key = %key, error = %e, "Failed to write cache file");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.store.path_for(key)).await {
            Ok(()) => self.instruments.success("delete"),
            Err(e) if e.kind() == ErrorKind::NotFound => self.instruments.success("delete"),
            Err(e) => {
                self.instruments.failure("delete");
                warn!(layer = LAYER_NAME, key = %key, error = %e, "Failed to delete cache file");
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.lookup(key, "exists").await.is_some()
    }

    async fn clear(&self) -> Result<()> {
        match self.store.entry_paths().await {
            Ok(paths) => {
                for path in paths {
                    remove_quietly(&path).await;
                }
                self.instruments.success("clear");
                info!(layer = LAYER_NAME, "File cache cleared");
            }
            Err(e) => {
                self.instruments.failure("clear");
                warn!(layer = LAYER_NAME, error = %e, "Failed to list cache directory");
            }
        }
        Ok(())
    }

    async fn stats(&self) -> CacheLayerStats {
        match self.store.footprint().await {
            Ok((keys, bytes)) => self.instruments.stats(keys, Some(bytes)),
            Err(e) => {
                self.instruments.failure("stats");
                warn!(layer = LAYER_NAME, error = %e, "Failed to list cache directory");
                self.instruments.stats(0, None)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Option<u64> {
        self.lookup(key, "ttl").await?.remaining_ttl_at(now_millis())
    }

    async fn health_check(&self) -> bool {
        let probe = self.store.directory.join(HEALTH_PROBE);
        match fs::write(&probe, b"ok").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe).await;
                true
            }
            Err(_) => false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{NoopMetrics, OperationOutcome, PrometheusCacheMetrics};
    use bytes::Bytes;
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_layer(max_size: u64) -> (FileLayer, TempDir) {
        let tmp = TempDir::new().unwrap();
        let layer = FileLayer::new(
            FileLayerConfig {
                directory: tmp.path().join("cache"),
                max_size,
                cleanup_interval: 0,
            },
            NoopMetrics::shared(),
        )
        .await
        .unwrap();
        (layer, tmp)
    }

    #[test]
    fn test_file_name_sanitization() {
        assert_eq!(entry_file_name("images:cat.jpg"), "images:cat.jpg.json");
        assert_eq!(entry_file_name("a/b c?d"), "a_b_c_d.json");
        assert_eq!(entry_file_name("../etc"), ".._etc.json");
    }

    #[tokio::test]
    async fn test_creates_directory() {
        let (layer, _tmp) = test_layer(0).await;
        assert!(layer.directory().is_dir());
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let (layer, _tmp) = test_layer(0).await;

        layer.set("images:a", json!({"w": 10}).into(), None).await.unwrap();
        assert!(layer.exists("images:a").await);
        assert_eq!(
            layer.get("images:a").await.unwrap().as_json(),
            Some(&json!({"w": 10}))
        );

        let on_disk: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(layer.directory().join("images:a.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["value"], json!({"w": 10}));
        assert!(on_disk["timestamp"].is_i64());
        assert!(on_disk.get("ttl").is_none());

        layer.delete("images:a").await.unwrap();
        assert!(!layer.exists("images:a").await);
        // Deleting a missing key is fine
        layer.delete("images:a").await.unwrap();
    }

    #[tokio::test]
    async fn test_bytes_round_trip() {
        let (layer, _tmp) = test_layer(0).await;
        let blob = Bytes::from_static(b"\x89PNG\r\n\x1a\n");
        layer.set("blob", blob.clone().into(), Some(60)).await.unwrap();
        assert_eq!(layer.get("blob").await.unwrap().as_bytes(), Some(&blob));
        assert!(layer.ttl("blob").await.unwrap() <= 60);
    }

    #[tokio::test]
    async fn test_ttl_expiry_removes_file() {
        let (layer, _tmp) = test_layer(0).await;
        layer.set("short", json!("v").into(), Some(1)).await.unwrap();
        let path = layer.directory().join("short.json");
        assert!(path.exists());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(layer.get("short").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_counted_miss() {
        let (layer, _tmp) = test_layer(0).await;
        std::fs::write(layer.directory().join("bad.json"), b"{oops").unwrap();

        assert!(layer.get("bad").await.is_none());
        let stats = layer.stats().await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_lookups_report_to_sink() {
        let tmp = TempDir::new().unwrap();
        let metrics = Arc::new(PrometheusCacheMetrics::new().unwrap());
        let layer = FileLayer::new(
            FileLayerConfig {
                directory: tmp.path().to_path_buf(),
                max_size: 0,
                cleanup_interval: 0,
            },
            metrics.clone(),
        )
        .await
        .unwrap();
        layer.set("k", json!(1).into(), Some(60)).await.unwrap();
        std::fs::write(layer.directory().join("bad.json"), b"{oops").unwrap();

        assert!(layer.exists("k").await);
        assert!(layer.ttl("k").await.unwrap() <= 60);
        assert!(!layer.exists("bad").await);

        assert_eq!(metrics.operation_count("exists", "file", OperationOutcome::Success), 1);
        assert_eq!(metrics.operation_count("ttl", "file", OperationOutcome::Success), 1);
        assert_eq!(metrics.operation_count("exists", "file", OperationOutcome::Error), 1);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let (layer, _tmp) = test_layer(0).await;
        layer.set("a", json!(1).into(), None).await.unwrap();
        layer.set("b", json!(2).into(), None).await.unwrap();
        layer.get("a").await;
        layer.get("zzz").await;

        let stats = layer.stats().await;
        assert_eq!(stats.keys, 2);
        assert!(stats.memory_usage_bytes.unwrap() > 0);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

        layer.clear().await.unwrap();
        assert_eq!(layer.stats().await.keys, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired_then_oldest() {
        let (layer, _tmp) = test_layer(0).await;
        layer.set("expiring", json!(1).into(), Some(1)).await.unwrap();
        layer.set("kept", json!(1).into(), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let report = layer.cleanup().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert!(layer.exists("kept").await);
    }

    #[tokio::test]
    async fn test_cleanup_enforces_max_size() {
        let (layer, _tmp) = test_layer(0).await;
        for i in 0..4 {
            layer
                .set(&format!("k{}", i), CacheValue::from(vec![7u8; 256]), None)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (_, total) = layer.store.footprint().await.unwrap();
        let per_entry = total / 4;

        let bounded = FileStore {
            directory: layer.directory().to_path_buf(),
            max_size: per_entry * 2,
        };
        let report = bounded.cleanup().await.unwrap();
        assert_eq!(report.evicted, 2);
        assert!(report.remaining_bytes <= per_entry * 2);
        // Oldest go first
        assert!(!layer.exists("k0").await);
        assert!(!layer.exists("k1").await);
        assert!(layer.exists("k3").await);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (layer, _tmp) = test_layer(0).await;
        assert!(layer.health_check().await);
        assert!(!layer.directory().join(HEALTH_PROBE).exists());
    }
}
