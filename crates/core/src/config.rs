//! Configuration types shared across crates.

use crate::media::default_allowed_types;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Byte size of every non-final chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Upper bound on the declared size at initiate.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Advisory per-batch file limit surfaced via /config (not enforced).
    #[serde(default = "default_max_files")]
    pub max_files: u32,
    /// Advisory parallel-chunk limit surfaced to clients via /config.
    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: u32,
    /// Declared media types accepted at initiate.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Enable the /metrics endpoint for Prometheus scraping.
    /// When enabled, restrict the endpoint to scraper IPs at the
    /// infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    crate::DEFAULT_MAX_FILE_SIZE
}

fn default_max_files() -> u32 {
    10
}

fn default_max_parallel_uploads() -> u32 {
    3
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            max_parallel_uploads: default_max_parallel_uploads(),
            allowed_types: default_allowed_types(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Filesystem layout configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for finalised objects (and the dedup index file).
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Root directory for staged chunks.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/storage")
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("./data/staging")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            staging_root: default_staging_root(),
        }
    }
}

/// Session store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/hopper.db")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Lifecycle sweeper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds after which an untouched staging directory is swept.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// Days after which stored objects are swept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interval between staging sweeps.
    #[serde(default = "default_staging_sweep_interval_secs")]
    pub staging_sweep_interval_secs: u64,
    /// Interval between object-store sweeps.
    #[serde(default = "default_object_sweep_interval_secs")]
    pub object_sweep_interval_secs: u64,
}

fn default_chunk_timeout_secs() -> u64 {
    1800
}

fn default_retention_days() -> u32 {
    30
}

fn default_staging_sweep_interval_secs() -> u64 {
    3600
}

fn default_object_sweep_interval_secs() -> u64 {
    86400
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            chunk_timeout_secs: default_chunk_timeout_secs(),
            retention_days: default_retention_days(),
            staging_sweep_interval_secs: default_staging_sweep_interval_secs(),
            object_sweep_interval_secs: default_object_sweep_interval_secs(),
        }
    }
}

impl SweepConfig {
    /// Staging expiry horizon as a Duration.
    pub fn chunk_timeout(&self) -> Duration {
        Duration::seconds(i64::try_from(self.chunk_timeout_secs).unwrap_or(i64::MAX))
    }

    /// Object retention horizon as a Duration.
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration rooted in the given directory.
    ///
    /// **For testing only.** Tests instantiate fresh roots in temp
    /// directories instead of sharing process-wide paths.
    pub fn for_testing(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig {
                storage_root: base.join("storage"),
                staging_root: base.join("staging"),
            },
            metadata: MetadataConfig {
                path: base.join("hopper.db"),
            },
            sweep: SweepConfig::default(),
        }
    }
}
