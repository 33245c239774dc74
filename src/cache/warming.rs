//! Cache Warming Service
//!
//! Pre-populates the fastest layer with popular resources from the storage
//! directory, ranked by the access counters kept in sidecar metadata files.
//! Writes go straight to that layer, bypassing the coordinator.

use crate::cache::entry::CacheValue;
use crate::cache::key::CacheKeyStrategy;
use crate::cache::layers::{CacheLayer, CacheLayerRef};
use crate::error::{Error, Result};
use crate::telemetry::{MetricsSinkRef, OperationOutcome};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use glob::MatchOptions;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// TTL of a warmed entry before popularity scaling, in seconds
pub const BASE_WARM_TTL: u64 = 3600;

/// Popularity multiplier cap: TTL grows to at most `(1 + cap)` times the base
const MAX_POPULARITY_BOOST: f64 = 5.0;

// =============================================================================
// Warming Configuration
// =============================================================================

/// Configuration for the warming service (`cache.warming`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WarmingConfig {
    pub enabled: bool,
    #[serde(alias = "warmOnStart")]
    pub warmup_on_start: bool,
    pub max_files_to_warm: usize,
    /// Cron expression driving scheduled passes
    #[serde(alias = "schedule")]
    pub warmup_cron: String,
    /// Minimum access count for a file to be warmed
    #[serde(alias = "popularityThreshold")]
    pub popular_image_threshold: u64,
    /// Directory holding the primary resource files
    pub storage_directory: PathBuf,
    /// Key namespace of warmed entries
    pub namespace: String,
    /// Glob patterns selecting primary resource files
    pub file_patterns: Vec<String>,
    /// Extension of the sidecar metadata file
    pub metadata_extension: String,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_on_start: false,
            max_files_to_warm: 100,
            warmup_cron: "0 */6 * * *".to_string(),
            popular_image_threshold: 5,
            storage_directory: PathBuf::from("./storage/images"),
            namespace: "images".to_string(),
            file_patterns: ["*.jpg", "*.jpeg", "*.png", "*.gif", "*.webp", "*.avif"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            metadata_extension: "json".to_string(),
        }
    }
}

// =============================================================================
// Access Information
// =============================================================================

/// Popularity data for one resource file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccessInfo {
    pub path: PathBuf,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: u64,
}

impl FileAccessInfo {
    /// File name used as the cache identifier
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SidecarMetadata {
    access_count: u64,
}

/// Access count recorded in a sidecar file; absent or malformed reads as 1
fn read_access_count(sidecar: &Path) -> u64 {
    std::fs::read_to_string(sidecar)
        .ok()
        .and_then(|raw| serde_json::from_str::<SidecarMetadata>(&raw).ok())
        .map(|meta| meta.access_count)
        .unwrap_or(1)
}

/// TTL for a warmed entry: scales with popularity up to six times the base
pub fn warm_ttl(access_count: u64) -> u64 {
    let boost = (access_count as f64 / 10.0).min(MAX_POPULARITY_BOOST);
    (BASE_WARM_TTL as f64 * (1.0 + boost)).round() as u64
}

/// Keep files at or above `threshold`, most popular first, at most `limit`
///
/// Ties are broken by most recent access.
pub fn select_candidates(
    mut files: Vec<FileAccessInfo>,
    threshold: u64,
    limit: usize,
) -> Vec<FileAccessInfo> {
    files.retain(|f| f.access_count >= threshold);
    files.sort_by(|a, b| {
        b.access_count
            .cmp(&a.access_count)
            .then_with(|| b.last_accessed.cmp(&a.last_accessed))
    });
    files.truncate(limit);
    files
}

/// Blocking scan of the storage directory
fn scan_directory(config: &WarmingConfig) -> Result<Vec<FileAccessInfo>> {
    let root = &config.storage_directory;
    if !root.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("storage directory {} not found", root.display()),
        )));
    }

    let options = MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());

    let mut paths = BTreeSet::new();
    for pattern in &config.file_patterns {
        let full = format!("{}/{}", escaped_root, pattern);
        let matches = glob::glob_with(&full, options)
            .map_err(|e| Error::Configuration(format!("invalid file pattern {}: {}", pattern, e)))?;
        for entry in matches {
            match entry {
                Ok(path) if path.is_file() => {
                    paths.insert(path);
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Skipping unreadable path"),
            }
        }
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let sidecar = path.with_extension(&config.metadata_extension);
        if sidecar == path {
            continue;
        }
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        let last_accessed = meta
            .accessed()
            .or_else(|_| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        files.push(FileAccessInfo {
            access_count: read_access_count(&sidecar),
            size_bytes: meta.len(),
            last_accessed,
            path,
        });
    }
    Ok(files)
}

// =============================================================================
// Reports
// =============================================================================

/// Lifecycle state of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmingState {
    Disabled,
    Idle,
    Warming,
}

/// Outcome of one warming pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    /// Files that passed the popularity filter
    pub candidates: usize,
    /// Keys written, in order
    pub warmed: Vec<String>,
    /// Candidates already resident
    pub skipped: usize,
    pub failed: usize,
}

/// Summary exposed to health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupStats {
    pub enabled: bool,
    pub last_warmup_time: Option<DateTime<Utc>>,
    /// Entries currently resident in the warmed layer
    pub files_warmed: u64,
    pub cache_size_bytes: u64,
}

/// Resets the in-progress flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Cache Warming Service
// =============================================================================

/// Popularity-driven warmer for the fastest cache layer
pub struct CacheWarmingService {
    config: WarmingConfig,
    layer: CacheLayerRef,
    metrics: MetricsSinkRef,
    warming: AtomicBool,
    last_warmup: RwLock<Option<DateTime<Utc>>>,
    passes: AtomicU64,
}

impl CacheWarmingService {
    pub fn new(config: WarmingConfig, layer: CacheLayerRef, metrics: MetricsSinkRef) -> Self {
        info!(
            enabled = config.enabled,
            layer = layer.name(),
            directory = %config.storage_directory.display(),
            max_files = config.max_files_to_warm,
            threshold = config.popular_image_threshold,
            "Cache warming service initialized"
        );
        Self {
            config,
            layer,
            metrics,
            warming: AtomicBool::new(false),
            last_warmup: RwLock::new(None),
            passes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> WarmingState {
        if !self.config.enabled {
            WarmingState::Disabled
        } else if self.warming.load(Ordering::Acquire) {
            WarmingState::Warming
        } else {
            WarmingState::Idle
        }
    }

    /// Number of completed passes
    pub fn completed_passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Entry point for the scheduler
    pub async fn run_scheduled_warmup(&self) {
        info!("Running scheduled cache warmup");
        if let Err(e) = self.warm_cache().await {
            warn!(error = %e, "Scheduled cache warmup failed");
        }
    }

    /// Run one pass if configured to warm at startup
    pub async fn warm_on_start(&self) -> Result<Option<WarmupReport>> {
        if !self.config.warmup_on_start {
            debug!("Startup warmup not configured");
            return Ok(None);
        }
        info!("Warming cache on startup");
        self.warm_cache().await
    }

    /// Run one warming pass
    ///
    /// Returns `None` when the service is disabled or a pass is already
    /// running. A failure on one file does not stop the others.
    pub async fn warm_cache(&self) -> Result<Option<WarmupReport>> {
        if !self.config.enabled {
            debug!("Cache warming disabled");
            return Ok(None);
        }
        if self.warming.swap(true, Ordering::AcqRel) {
            info!("Cache warmup already in progress, skipping trigger");
            return Ok(None);
        }
        let _guard = PassGuard(&self.warming);

        let result = self.run_pass().await;
        let outcome = match &result {
            Ok(report) if report.failed == 0 => OperationOutcome::Success,
            _ => OperationOutcome::Error,
        };
        self.metrics
            .record_cache_operation("warmup", self.layer.name(), outcome);

        *self.last_warmup.write() = Some(Utc::now());
        self.passes.fetch_add(1, Ordering::Relaxed);
        result.map(Some)
    }

    async fn run_pass(&self) -> Result<WarmupReport> {
        let config = self.config.clone();
        let files = tokio::task::spawn_blocking(move || scan_directory(&config))
            .await
            .map_err(|e| Error::Internal(format!("directory scan panicked: {}", e)))??;
        let scanned = files.len();

        let candidates = select_candidates(
            files,
            self.config.popular_image_threshold,
            self.config.max_files_to_warm,
        );

        let mut report = WarmupReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for file in candidates {
            let key = CacheKeyStrategy::generate_key(&self.config.namespace, &file.file_name(), None);

            if self.layer.exists(&key).await {
                report.skipped += 1;
                continue;
            }

            match self.warm_file(&key, &file).await {
                Ok(()) => report.warmed.push(key),
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %file.path.display(), error = %e, "Failed to warm file");
                }
            }
        }

        info!(
            scanned,
            candidates = report.candidates,
            warmed = report.warmed.len(),
            skipped = report.skipped,
            failed = report.failed,
            "Cache warmup completed"
        );
        Ok(report)
    }

    async fn warm_file(&self, key: &str, file: &FileAccessInfo) -> Result<()> {
        let content = tokio::fs::read(&file.path).await?;
        let ttl = warm_ttl(file.access_count);
        self.layer
            .set(key, CacheValue::from(content), Some(ttl))
            .await?;
        debug!(key = %key, access_count = file.access_count, ttl, "Warmed cache entry");
        Ok(())
    }

    /// Write one resource directly, bypassing scan and filter
    ///
    /// Works whether or not scheduled warming is enabled.
    pub async fn warm_specific_file(
        &self,
        resource_id: &str,
        content: Bytes,
        ttl: Option<u64>,
    ) -> Result<()> {
        let key = CacheKeyStrategy::generate_key(&self.config.namespace, resource_id, None);
        let ttl = ttl.unwrap_or(BASE_WARM_TTL);
        self.layer.set(&key, CacheValue::from(content), Some(ttl)).await?;
        info!(key = %key, ttl, "Warmed specific file");
        Ok(())
    }

    /// Current warmup summary, read from the warmed layer's stats
    pub async fn get_warmup_stats(&self) -> WarmupStats {
        let stats = self.layer.stats().await;
        WarmupStats {
            enabled: self.config.enabled,
            last_warmup_time: *self.last_warmup.read(),
            files_warmed: stats.keys,
            cache_size_bytes: stats.memory_usage_bytes.unwrap_or(0),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
