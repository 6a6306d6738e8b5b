//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing keys take the defaults below.

use crate::io::offline_queue::{BackoffPolicy, QueueConfig};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Event/site identifier, carried in logs
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "scan-engine".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    /// JSON file with attendees, booths, sessions and registrations
    #[serde(default = "default_snapshot_path")]
    pub path: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { path: default_snapshot_path() }
    }
}

fn default_snapshot_path() -> String {
    "config/event.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Identical scans inside this window replay the cached outcome
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { cooldown_secs: default_cooldown_secs() }
    }
}

fn default_cooldown_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// JSONL journal of pending scans
    #[serde(default = "default_queue_path")]
    pub path: String,
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_dedup_bucket_secs")]
    pub dedup_bucket_secs: u64,
    /// Journal operations between compactions
    #[serde(default = "default_compact_after")]
    pub compact_after: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            dedup_bucket_secs: default_dedup_bucket_secs(),
            compact_after: default_compact_after(),
        }
    }
}

fn default_queue_path() -> String {
    "data/pending_scans.jsonl".to_string()
}

fn default_queue_capacity() -> usize {
    500
}

fn default_max_attempts() -> u32 {
    8
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_dedup_bucket_secs() -> u64 {
    60
}

fn default_compact_after() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the authoritative store; credentials may be embedded
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { url: default_store_url(), commit_timeout_ms: default_commit_timeout_ms() }
    }
}

fn default_store_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_commit_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: default_sync_interval_secs() }
    }
}

fn default_sync_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Enable the device TCP listener
    #[serde(default = "default_listener_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listener_port")]
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { enabled: default_listener_enabled(), port: default_listener_port() }
    }
}

fn default_listener_enabled() -> bool {
    true
}

fn default_listener_port() -> u16 {
    7400
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    snapshot_path: String,
    cooldown_secs: u64,
    queue_path: String,
    queue_capacity: usize,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    dedup_bucket_secs: u64,
    compact_after: usize,
    store_url: String,
    commit_timeout_ms: u64,
    sync_interval_secs: u64,
    listener_enabled: bool,
    listener_port: u16,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            snapshot_path: toml_config.snapshot.path,
            cooldown_secs: toml_config.scan.cooldown_secs,
            queue_path: toml_config.queue.path,
            queue_capacity: toml_config.queue.capacity,
            max_attempts: toml_config.queue.max_attempts,
            base_backoff_ms: toml_config.queue.base_backoff_ms,
            max_backoff_ms: toml_config.queue.max_backoff_ms,
            dedup_bucket_secs: toml_config.queue.dedup_bucket_secs,
            compact_after: toml_config.queue.compact_after,
            store_url: toml_config.store.url,
            commit_timeout_ms: toml_config.store.commit_timeout_ms,
            sync_interval_secs: toml_config.sync.interval_secs,
            listener_enabled: toml_config.listener.enabled,
            listener_port: toml_config.listener.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Offline queue settings for `OfflineScanQueue::open`
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            path: Some(PathBuf::from(&self.queue_path)),
            capacity: self.queue_capacity,
            max_attempts: self.max_attempts,
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.base_backoff_ms),
                max: Duration::from_millis(self.max_backoff_ms),
            },
            dedup_bucket: Duration::from_secs(self.dedup_bucket_secs),
            compact_after: self.compact_after,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn snapshot_path(&self) -> &str {
        &self.snapshot_path
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn queue_path(&self) -> &str {
        &self.queue_path
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn dedup_bucket_secs(&self) -> u64 {
        self.dedup_bucket_secs
    }

    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn listener_enabled(&self) -> bool {
        self.listener_enabled
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point the queue somewhere writable
    pub fn with_queue_path(mut self, path: impl Into<String>) -> Self {
        self.queue_path = path.into();
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<String>) -> Self {
        self.snapshot_path = path.into();
        self
    }
}
