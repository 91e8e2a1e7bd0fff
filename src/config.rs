//! TOML configuration.
//!
//! Every section is optional: a missing file or an empty one yields a
//! working configuration that points at the Linear desktop app's default
//! cache location.
//!
//! ```toml
//! [snapshot]
//! path = "~/Library/Application Support/Linear/IndexedDB/https_linear.app_0.indexeddb.leveldb"
//!
//! [cache]
//! ttl_secs = 300
//! source_timeout_secs = 30
//! retry_backoff_secs = 5
//!
//! [schema]
//! sample_size = 200
//! min_sample = 1
//! max_skip_ratio = 0.5
//! min_confidence = 0.6
//!
//! [query]
//! default_limit = 50
//! max_limit = 100
//!
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SNAPSHOT_PATH: &str =
    "~/Library/Application Support/Linear/IndexedDB/https_linear.app_0.indexeddb.leveldb";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_PATH)
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    /// Pause after a failed rebuild before the next one is attempted.
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            source_timeout_secs: default_source_timeout_secs(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_source_timeout_secs() -> u64 {
    30
}
fn default_retry_backoff_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_min_sample")]
    pub min_sample: usize,
    #[serde(default = "default_max_skip_ratio")]
    pub max_skip_ratio: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            min_sample: default_min_sample(),
            max_skip_ratio: default_max_skip_ratio(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_sample_size() -> usize {
    200
}
fn default_min_sample() -> usize {
    1
}
fn default_max_skip_ratio() -> f64 {
    0.5
}
fn default_min_confidence() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> usize {
    50
}
fn default_max_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Snapshot path with a leading `~` expanded to the home directory.
    pub fn snapshot_path(&self) -> PathBuf {
        expand_home(&self.snapshot.path)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Load and validate configuration. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if config.cache.source_timeout_secs == 0 {
        anyhow::bail!("cache.source_timeout_secs must be > 0");
    }

    // Validate schema sampling
    if config.schema.min_sample == 0 {
        anyhow::bail!("schema.min_sample must be >= 1");
    }
    if config.schema.sample_size < config.schema.min_sample {
        anyhow::bail!("schema.sample_size must be >= schema.min_sample");
    }
    if !(0.0..=1.0).contains(&config.schema.max_skip_ratio) {
        anyhow::bail!("schema.max_skip_ratio must be in [0.0, 1.0]");
    }
    if !(config.schema.min_confidence > 0.0 && config.schema.min_confidence <= 1.0) {
        anyhow::bail!("schema.min_confidence must be in (0.0, 1.0]");
    }

    // Validate query limits
    if config.query.default_limit == 0 {
        anyhow::bail!("query.default_limit must be >= 1");
    }
    if config.query.default_limit > config.query.max_limit {
        anyhow::bail!(
            "query.default_limit ({}) must not exceed query.max_limit ({})",
            config.query.default_limit,
            config.query.max_limit
        );
    }

    Ok(())
}
