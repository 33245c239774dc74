//! Application Configuration
//!
//! YAML configuration with camelCase keys. Every field has a default, so an
//! empty document is a valid configuration.
//!
//! ```yaml
//! cache:
//!   memory:
//!     defaultTtl: 3600
//!     maxKeys: 10000
//!   redis:
//!     host: redis.internal
//!     port: 6379
//!   file:
//!     directory: ./cache
//!   promotion:
//!     ttlPolicy: remaining
//!   warming:
//!     enabled: true
//!     warmupCron: "0 */6 * * *"
//! ```

use crate::cache::coordinator::PromotionConfig;
use crate::cache::layers::{FileLayerConfig, MemoryLayerConfig, RemoteLayerConfig};
use crate::cache::scheduler::parse_cron;
use crate::cache::warming::WarmingConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub cache: CacheConfig,
}

/// Cache subsystem configuration (`cache`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub memory: MemoryLayerConfig,
    /// Remote layer settings; the layer is disabled when absent or null.
    /// A present block must name its host.
    pub redis: Option<RemoteLayerConfig>,
    pub file: FileLayerConfig,
    pub promotion: PromotionConfig,
    pub warming: WarmingConfig,
}

impl AppConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_yaml(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reject values the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;

        let threshold = cache.memory.warning_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Configuration(format!(
                "cache.memory.warningThreshold must be within 0..=1, got {}",
                threshold
            )));
        }

        if let Some(redis) = &cache.redis {
            redis.validate()?;
        }

        if cache.file.directory.as_os_str().is_empty() {
            return Err(Error::Configuration("cache.file.directory must not be empty".to_string()));
        }

        if cache.warming.enabled {
            parse_cron(&cache.warming.warmup_cron)?;
            if cache.warming.file_patterns.is_empty() {
                return Err(Error::Configuration(
                    "cache.warming.filePatterns must not be empty".to_string(),
                ));
            }
        }
        if cache.warming.namespace.is_empty() {
            return Err(Error::Configuration(
                "cache.warming.namespace must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::coordinator::PromotionTtlPolicy;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.cache.memory.default_ttl, 3600);
        assert_eq!(config.cache.memory.check_period, 600);
        assert!(config.cache.redis.is_none());
        assert_eq!(config.cache.file.directory, PathBuf::from("./cache"));
        assert_eq!(config.cache.warming.warmup_cron, "0 */6 * * *");
        assert_eq!(config.cache.promotion.ttl_policy, PromotionTtlPolicy::Remaining);
    }

    #[test]
    fn test_camel_case_keys() {
        let raw = r#"
cache:
  memory:
    defaultTtl: 60
    maxKeys: 5
    warningThreshold: 0.5
  redis:
    host: redis.internal
    port: 6380
    password: secret
    db: 3
    maxRetries: 1
  file:
    directory: /var/cache/media
    maxSize: 1024
    cleanupInterval: 0
  promotion:
    ttlPolicy: default
    defaultTtl: 120
  warming:
    enabled: true
    warmupOnStart: true
    maxFilesToWarm: 10
    popularImageThreshold: 2
"#;
        let config = AppConfig::from_yaml(raw).unwrap();
        let cache = config.cache;
        assert_eq!(cache.memory.default_ttl, 60);
        assert_eq!(cache.memory.max_keys, 5);
        let redis = cache.redis.unwrap();
        assert_eq!(redis.host.as_deref(), Some("redis.internal"));
        assert_eq!(redis.db, 3);
        assert_eq!(redis.max_retries, 1);
        assert_eq!(cache.file.max_size, 1024);
        assert_eq!(cache.promotion.ttl_policy, PromotionTtlPolicy::Default);
        assert_eq!(cache.promotion.default_ttl, 120);
        assert!(cache.warming.warmup_on_start);
        assert_eq!(cache.warming.max_files_to_warm, 10);
    }

    #[test]
    fn test_missing_redis_host_rejected() {
        let raw = "cache:\n  redis:\n    host: ''\n";
        assert_matches!(AppConfig::from_yaml(raw), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_redis_block_without_host_rejected() {
        let raw = "cache:\n  redis:\n    port: 6380\n";
        assert_matches!(AppConfig::from_yaml(raw), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_null_redis_disables_remote_layer() {
        let config = AppConfig::from_yaml("cache:\n  redis: null\n").unwrap();
        assert!(config.cache.redis.is_none());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let raw = "cache:\n  warming:\n    warmupCron: 'every day'\n";
        assert_matches!(AppConfig::from_yaml(raw), Err(Error::CronParse { .. }));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let raw = "cache:\n  memory:\n    warningThreshold: 1.5\n";
        assert_matches!(AppConfig::from_yaml(raw), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        assert_matches!(AppConfig::from_yaml("cache: ["), Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/media-cache.yaml")).unwrap();
        assert!(config.cache.warming.enabled);
        assert!(config.cache.redis.is_none());
    }
}
