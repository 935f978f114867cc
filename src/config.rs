//! Runtime configuration for tiered-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tier-related knobs (TTLs, capacities, intervals, timeouts) live here.
//! Every section falls back to its defaults for missing fields.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiered-cache", about = "Inspect and maintain a tiered key/value cache")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "tiered-cache.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Maintenance commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Look up a key and print its value as JSON.
    Get { key: String },

    /// Store a value. Non-JSON input is stored as a string.
    Set {
        key: String,
        value: String,
        /// Time-to-live in seconds (defaults to the memory tier TTL).
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Remove a key from every tier.
    Delete { key: String },

    /// Check whether a key is cached in any tier.
    Has { key: String },

    /// Clear every enabled tier.
    Flush,

    /// Print cache statistics.
    Stats,

    /// Run a disk cleanup pass.
    Cleanup,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// In-process memory tier.
    pub memory: MemoryConfig,

    /// Local disk tier.
    pub disk: DiskConfig,

    /// Optional remote tier.
    pub remote: RemoteConfig,

    /// Background maintenance.
    pub janitor: JanitorConfig,

    /// Operation and start-up timeouts.
    pub timeouts: TimeoutConfig,
}

/// Memory tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Default TTL for new entries in seconds (0 = never expire).
    pub std_ttl_secs: u64,

    /// Interval between expired-key purges in seconds (0 = lazy expiry only).
    pub check_interval_secs: u64,

    /// Maximum number of resident keys (0 = unbounded).
    pub max_keys: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            std_ttl_secs: 600,
            check_interval_secs: 120,
            max_keys: 1000,
        }
    }
}

/// Disk tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Enable the disk tier.
    pub enabled: bool,

    /// Root directory for cache files.
    pub path: PathBuf,

    /// Maximum file age in seconds before an entry is considered stale (0 = no limit).
    pub ttl_secs: u64,

    /// Maximum bytes on disk (0 = unbounded).
    pub max_bytes: u64,

    /// Capacity eviction stops once usage drops below this fraction of `max_bytes`.
    pub low_watermark: f64,

    /// Fail start-up instead of disabling the tier when the directory is unusable.
    pub required: bool,

    /// Payload compression.
    pub compression: CompressionConfig,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./cache"),
            ttl_secs: 24 * 60 * 60,
            max_bytes: 100 * 1024 * 1024, // 100 MiB
            low_watermark: 0.80,
            required: false,
            compression: CompressionConfig::default(),
        }
    }
}

/// Compression settings for disk payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Apply zstd compression when writing to disk.
    pub enabled: bool,

    /// zstd compression level (1-22).
    pub level: i32,

    /// Payloads smaller than this are stored uncompressed.
    pub min_size_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 3,
            min_size_bytes: 1024,
        }
    }
}

/// Remote tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Enable the remote tier.
    pub enabled: bool,

    /// Base URL of the key/value service (e.g. "http://127.0.0.1:7700/kv").
    pub url: Option<String>,

    /// Prefix prepended to every key stored remotely.
    pub key_prefix: String,

    /// Fail start-up instead of disabling the tier when the service is unreachable.
    pub required: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            key_prefix: "cache:".to_string(),
            required: false,
        }
    }
}

/// Janitor schedule. A zero interval disables that task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Start the janitor once the cache is ready.
    pub enabled: bool,

    /// Interval between disk cleanup passes in seconds.
    pub disk_cleanup_interval_secs: u64,

    /// Interval between statistics log lines in seconds.
    pub stats_interval_secs: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_cleanup_interval_secs: 30 * 60,
            stats_interval_secs: 5 * 60,
        }
    }
}

/// Timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for a single disk or remote operation, in milliseconds.
    pub operation_ms: u64,

    /// How long callers wait for start-up before an operation degrades, in milliseconds.
    pub startup_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            operation_ms: 2000,
            startup_ms: 5000,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: CacheConfig = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(CacheConfig::default())
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let wm = self.disk.low_watermark;
        if !(wm > 0.0 && wm <= 1.0) {
            return Err(format!("disk.low_watermark must be in (0, 1], got {wm}"));
        }
        if !(1..=22).contains(&self.disk.compression.level) {
            return Err(format!(
                "disk.compression.level must be in 1..=22, got {}",
                self.disk.compression.level
            ));
        }
        if self.timeouts.operation_ms == 0 {
            return Err("timeouts.operation_ms must be non-zero".to_string());
        }
        if self.remote.enabled && self.remote.url.is_none() {
            return Err("remote.enabled requires remote.url".to_string());
        }
        Ok(())
    }

    /// A configuration with only the memory tier, useful for tests and embedding.
    pub fn memory_only() -> Self {
        let mut config = Self::default();
        config.disk.enabled = false;
        config.janitor.enabled = false;
        config
    }

    pub fn std_ttl(&self) -> Duration {
        Duration::from_secs(self.memory.std_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.operation_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.startup_ms)
    }
}
