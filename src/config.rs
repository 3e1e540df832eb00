//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::ingester::{Limits, OrderingPolicy};
use crate::storage::{Encoding, UnknownEncoding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingester: IngesterConfig,

    /// Limits applied to every tenant without an override
    #[serde(default)]
    pub limits: Limits,

    /// Per-tenant limit overrides, keyed by tenant id
    #[serde(default)]
    pub tenants: HashMap<String, Limits>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingester configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngesterConfig {
    /// Block codec for new chunks: none, lz4, zstd
    #[serde(default = "default_chunk_encoding")]
    pub chunk_encoding: String,

    /// Resolved `chunk_encoding`, set by `validate`
    #[serde(skip)]
    pub parsed_encoding: Option<Encoding>,

    #[serde(default = "default_block_size")]
    pub block_size_bytes: usize,

    #[serde(default = "default_chunk_target_size")]
    pub chunk_target_size_bytes: usize,

    #[serde(default = "default_max_chunk_age")]
    pub max_chunk_age_ms: u64,

    #[serde(default = "default_max_chunk_idle")]
    pub max_chunk_idle_ms: u64,

    /// How long flushed chunks stay queryable in memory
    #[serde(default = "default_retain_period")]
    pub retain_period_ms: u64,

    #[serde(default = "default_flush_check_period")]
    pub flush_check_period_ms: u64,

    #[serde(default = "default_concurrent_flushes")]
    pub concurrent_flushes: usize,

    #[serde(default = "default_flush_op_timeout")]
    pub flush_op_timeout_ms: u64,

    #[serde(default = "default_min_backoff")]
    pub min_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,

    /// Upper bound on the shutdown flush before unflushed chunks are dropped
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Shards per tenant label index; zero is rejected
    #[serde(default = "default_index_shards")]
    pub index_shards: usize,

    /// Also consult the durable store on reads
    #[serde(default)]
    pub query_store: bool,

    /// How far back store reads may reach; 0 means unlimited
    #[serde(default)]
    pub query_store_max_look_back_ms: u64,

    #[serde(default)]
    pub ordering: OrderingPolicy,

    /// Entries per query response batch
    #[serde(default = "default_query_batch_size")]
    pub query_batch_size: usize,

    /// Capacity of each tail subscriber's channel
    #[serde(default = "default_tail_buffer")]
    pub tail_buffer: usize,
}

fn default_chunk_encoding() -> String {
    "lz4".to_string()
}

fn default_block_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_chunk_target_size() -> usize {
    1536 * 1024 // 1.5 MB
}

fn default_max_chunk_age() -> u64 {
    2 * 60 * 60 * 1000 // 2 hours
}

fn default_max_chunk_idle() -> u64 {
    30 * 60 * 1000 // 30 minutes
}

fn default_retain_period() -> u64 {
    15 * 60 * 1000 // 15 minutes
}

fn default_flush_check_period() -> u64 {
    30 * 1000
}

fn default_concurrent_flushes() -> usize {
    16
}

fn default_flush_op_timeout() -> u64 {
    10 * 1000
}

fn default_min_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    10 * 1000
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    30 * 1000
}

fn default_index_shards() -> usize {
    32
}

fn default_query_batch_size() -> usize {
    128
}

fn default_tail_buffer() -> usize {
    1024
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            chunk_encoding: default_chunk_encoding(),
            parsed_encoding: None,
            block_size_bytes: default_block_size(),
            chunk_target_size_bytes: default_chunk_target_size(),
            max_chunk_age_ms: default_max_chunk_age(),
            max_chunk_idle_ms: default_max_chunk_idle(),
            retain_period_ms: default_retain_period(),
            flush_check_period_ms: default_flush_check_period(),
            concurrent_flushes: default_concurrent_flushes(),
            flush_op_timeout_ms: default_flush_op_timeout(),
            min_backoff_ms: default_min_backoff(),
            max_backoff_ms: default_max_backoff(),
            flush_on_shutdown: default_true(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            index_shards: default_index_shards(),
            query_store: false,
            query_store_max_look_back_ms: 0,
            ordering: OrderingPolicy::default(),
            query_batch_size: default_query_batch_size(),
            tail_buffer: default_tail_buffer(),
        }
    }
}

impl IngesterConfig {
    /// Check the configuration and cache the resolved chunk encoding
    ///
    /// Fails only for an unknown encoding or a zero shard count.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let encoding: Encoding = self
            .chunk_encoding
            .parse()
            .map_err(|e: UnknownEncoding| ConfigError::InvalidEncoding(e.0))?;

        if self.index_shards == 0 {
            return Err(ConfigError::InvalidShardCount);
        }

        self.parsed_encoding = Some(encoding);
        Ok(())
    }

    /// Encoding for new chunks; falls back to parsing if `validate` was skipped
    pub fn encoding(&self) -> Encoding {
        self.parsed_encoding
            .or_else(|| self.chunk_encoding.parse().ok())
            .unwrap_or_default()
    }

    pub fn max_chunk_age(&self) -> Duration {
        Duration::from_millis(self.max_chunk_age_ms)
    }

    pub fn max_chunk_idle(&self) -> Duration {
        Duration::from_millis(self.max_chunk_idle_ms)
    }

    pub fn retain_period(&self) -> Duration {
        Duration::from_millis(self.retain_period_ms)
    }

    pub fn flush_check_period(&self) -> Duration {
        Duration::from_millis(self.flush_check_period_ms.max(1))
    }

    pub fn flush_op_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_op_timeout_ms)
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.min_backoff_ms))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn query_store_max_look_back(&self) -> Duration {
        Duration::from_millis(self.query_store_max_look_back_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tributary").join("config.toml")),
            Some(PathBuf::from("/etc/tributary/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Validate every section that can fail
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.ingester.validate()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(encoding) = std::env::var("TRIBUTARY_CHUNK_ENCODING") {
            self.ingester.chunk_encoding = encoding;
        }
        if let Ok(shards) = std::env::var("TRIBUTARY_INDEX_SHARDS") {
            if let Ok(n) = shards.parse() {
                self.ingester.index_shards = n;
            }
        }
        if let Ok(query_store) = std::env::var("TRIBUTARY_QUERY_STORE") {
            if let Ok(b) = query_store.parse() {
                self.ingester.query_store = b;
            }
        }
        if let Ok(max) = std::env::var("TRIBUTARY_MAX_STREAMS_PER_USER") {
            if let Ok(n) = max.parse() {
                self.limits.max_local_streams_per_user = n;
            }
        }

        if let Ok(level) = std::env::var("TRIBUTARY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRIBUTARY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid chunk encoding: {0}")]
    InvalidEncoding(String),

    #[error("Index shard count must be greater than zero")]
    InvalidShardCount,
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tributary Configuration
#
# Environment variables override these settings:
# - TRIBUTARY_CHUNK_ENCODING
# - TRIBUTARY_INDEX_SHARDS
# - TRIBUTARY_QUERY_STORE
# - TRIBUTARY_MAX_STREAMS_PER_USER
# - TRIBUTARY_LOG_LEVEL
# - TRIBUTARY_LOG_FORMAT

[ingester]
# Block codec for chunks: none, lz4, zstd
chunk_encoding = "lz4"

# Uncompressed head size at which a block is cut (bytes)
block_size_bytes = 262144

# Chunk size at which a new head chunk is started (bytes)
chunk_target_size_bytes = 1572864

# Seal a chunk once it spans this long (ms)
max_chunk_age_ms = 7200000

# Seal a chunk that has not received entries for this long (ms)
max_chunk_idle_ms = 1800000

# Keep flushed chunks queryable in memory for this long (ms)
retain_period_ms = 900000

# How often to look for chunks to seal, flush and evict (ms)
flush_check_period_ms = 30000

# Number of flush workers
concurrent_flushes = 16

# Timeout for a single store write (ms)
flush_op_timeout_ms = 10000

# Retry backoff for failed store writes (ms)
min_backoff_ms = 100
max_backoff_ms = 10000

# Seal and flush everything on shutdown
flush_on_shutdown = true
shutdown_timeout_ms = 30000

# Shards per tenant label index
index_shards = 32

# Also read from the durable store
query_store = false

# How far back store reads may reach (ms, 0 = unlimited)
query_store_max_look_back_ms = 0

# Out-of-order entries: drop or accept
ordering = "drop"

# Entries per query response batch
query_batch_size = 128

# Per-subscriber tail channel capacity
tail_buffer = 1024

[limits]
# Active streams per tenant (0 = unlimited)
max_local_streams_per_user = 10000

# Per-tenant overrides
# [tenants.team-a]
# max_local_streams_per_user = 50000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let mut config = Config::from_toml(&generate_default_config()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.ingester, {
            let mut expected = IngesterConfig::default();
            expected.parsed_encoding = Some(Encoding::Lz4);
            expected
        });
        assert_eq!(config.limits.max_local_streams_per_user, 10000);
    }

    #[test]
    fn test_tenant_overrides_parse() {
        let config = Config::from_toml(
            r#"
            [limits]
            max_local_streams_per_user = 5

            [tenants.big]
            max_local_streams_per_user = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.max_local_streams_per_user, 5);
        assert_eq!(config.tenants["big"].max_local_streams_per_user, 500);
    }

    #[test]
    fn test_ordering_policy_parses() {
        let config = Config::from_toml("[ingester]\nordering = \"accept\"\n").unwrap();
        assert_eq!(config.ingester.ordering, OrderingPolicy::Accept);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ingester\n").unwrap();

        match Config::load(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
