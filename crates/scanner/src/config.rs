//! Daemon configuration
//!
//! Read from an optional TOML file (`SCANNER_CONFIG`, default
//! `/etc/idle-scanner/config.toml`) overlaid with `SCANNER__*` environment
//! variables, e.g. `SCANNER__API_PORT=9000` or `SCANNER__RETRY__MAX_ATTEMPTS=6`.

use anyhow::{Context, Result};
use scanner_lib::{
    ClassifierConfig, FileCacheStore, ResultCache, RetryPolicy, ScanConfig, TenantCredentials,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "/etc/idle-scanner/config.toml";

/// Scanner daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Name attached to structured log lines
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for scans, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory for the file cache store; in-memory when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Worker budget for region enumeration
    #[serde(default = "default_region_workers")]
    pub region_workers: usize,

    /// Worker budget for metric fetches
    #[serde(default = "default_metric_workers")]
    pub metric_workers: usize,

    /// Window used when a scan request does not name one
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Metric averaging period in seconds
    #[serde(default = "default_metric_period")]
    pub metric_period_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Cumulative bound on a single scan
    #[serde(default)]
    pub scan_deadline_secs: Option<u64>,

    #[serde(default)]
    pub force_no_cache: bool,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// JSON inventory served as the cloud backend
    #[serde(default)]
    pub inventory_path: Option<PathBuf>,

    #[serde(default)]
    pub tenants: Vec<TenantCredentials>,
}

/// Retry settings for remote calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_jitter(config.jitter)
    }
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "idle-scanner".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cache_ttl() -> u64 {
    scanner_lib::cache::DEFAULT_TTL.as_secs()
}

fn default_region_workers() -> usize {
    scanner_lib::scan::DEFAULT_REGION_WORKERS
}

fn default_metric_workers() -> usize {
    scanner_lib::scan::DEFAULT_METRIC_WORKERS
}

fn default_window_days() -> u32 {
    14
}

fn default_metric_period() -> u64 {
    scanner_lib::scan::DEFAULT_METRIC_PERIOD.as_secs()
}

fn default_max_attempts() -> u32 {
    scanner_lib::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> bool {
    true
}

impl ScannerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SCANNER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load with an explicit file path; a missing file is not an error
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SCANNER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Invalid scanner configuration")
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            region_workers: self.region_workers,
            metric_workers: self.metric_workers,
            metric_period: Duration::from_secs(self.metric_period_secs),
            retry: RetryPolicy::from(&self.retry),
            scan_deadline: self.scan_deadline_secs.map(Duration::from_secs),
            force_no_cache: self.force_no_cache,
            classifier: self.classifier,
        }
    }

    /// File-backed cache when `cache_dir` is set, in-memory otherwise
    pub fn build_cache(&self) -> Result<ResultCache> {
        let ttl = Duration::from_secs(self.cache_ttl_secs);
        match &self.cache_dir {
            Some(dir) => {
                let store = FileCacheStore::new(dir)
                    .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
                Ok(ResultCache::new(Arc::new(store), ttl))
            }
            None => Ok(ResultCache::in_memory(ttl)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanner_lib::MissingMetricPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ScannerConfig::load_from(&temp_dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.default_window_days, 14);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert!(config.cache_dir.is_none());
        assert!(config.tenants.is_empty());

        let scan = config.scan_config();
        assert_eq!(scan.region_workers, 4);
        assert_eq!(scan.metric_workers, 16);
        assert!(scan.scan_deadline.is_none());
    }

    #[test]
    fn test_file_values_override_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
api_port = 9100
metric_workers = 32
scan_deadline_secs = 120
inventory_path = "/var/lib/idle-scanner/inventory.json"

[retry]
max_attempts = 6
jitter = false

[classifier]
min_conditions = 3
missing_metrics = "treat_as_zero"

[[tenants]]
tenant_id = "acme"
access_key_id = "AK-ACME"
access_key_secret = "s3cret"
"#,
        )
        .unwrap();

        let config = ScannerConfig::load_from(&path).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.tenants.len(), 1);
        assert_eq!(config.tenants[0].access_key_secret, "s3cret");

        let scan = config.scan_config();
        assert_eq!(scan.metric_workers, 32);
        assert_eq!(scan.scan_deadline, Some(Duration::from_secs(120)));
        assert_eq!(scan.retry.max_attempts, 6);
        assert!(!scan.retry.jitter);
        assert_eq!(scan.retry.base_delay, Duration::from_millis(500));
        assert_eq!(scan.classifier.min_conditions, 3);
        assert_eq!(scan.classifier.missing_metrics, MissingMetricPolicy::TreatAsZero);
    }

    #[test]
    fn test_cache_dir_selects_file_store() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cache");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, format!("cache_dir = {:?}\ncache_ttl_secs = 60\n", dir)).unwrap();

        let config = ScannerConfig::load_from(&path).unwrap();
        let cache = config.build_cache().unwrap();
        assert_eq!(cache.ttl(), Duration::from_secs(60));
        assert!(dir.is_dir());
    }
}
