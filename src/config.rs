//! Backend and per-index configuration.
//!
//! Configuration is resolved once, at startup: loaded from a JSON file (or
//! built in code), then overridden from `STACKSHARD_*` environment variables.
//! Malformed values are reported as [`StackshardError::Config`] at that point,
//! never while work is running.

use crate::error::{Result, StackshardError};
use crate::tenancy::MultiTenancyMode;
use crate::types::{CommitStrategy, RefreshStrategy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// Smallest writer heap tantivy accepts for one indexing thread.
pub const MIN_WRITER_MEMORY_BUDGET_BYTES: usize = 15_000_000;

const DEFAULT_WRITER_MEMORY_BUDGET_BYTES: usize = 20_000_000;
const DEFAULT_COMMIT_INTERVAL_MS: u64 = 1000;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoStrategyName {
    /// Commit and refresh on timers, independently of individual writes.
    #[default]
    NearRealTime,
    /// Commit and refresh at the end of every batch.
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryKind {
    /// One directory per shard under `directory.root`.
    #[default]
    LocalFilesystem,
    /// In-memory directories, lost on stop.
    LocalHeap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardingStrategyName {
    #[default]
    None,
    Hash,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaManagementStrategy {
    None,
    #[default]
    CreateOrValidate,
    DropAndCreate,
    DropAndCreateAndDrop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoryConfig {
    #[serde(rename = "type")]
    pub kind: DirectoryKind,
    pub root: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            kind: DirectoryKind::LocalFilesystem,
            root: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IoConfig {
    pub strategy: IoStrategyName,
    pub commit_interval_ms: u64,
    pub refresh_interval_ms: u64,
    pub writer_memory_budget_bytes: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            strategy: IoStrategyName::NearRealTime,
            commit_interval_ms: DEFAULT_COMMIT_INTERVAL_MS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            writer_memory_budget_bytes: DEFAULT_WRITER_MEMORY_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShardingConfig {
    pub strategy: ShardingStrategyName,
    pub number_of_shards: Option<usize>,
    pub shard_identifiers: Vec<String>,
}

/// Serial orchestrator batching.
///
/// Queues are unbounded: submission never blocks, and callers that need a
/// ceiling on queued work enforce it before submitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexingQueueConfig {
    pub max_batch_size: usize,
    /// How long a drain waits for more units when the batch is not full.
    pub batch_window_ms: u64,
}

impl Default for IndexingQueueConfig {
    fn default() -> Self {
        IndexingQueueConfig {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_window_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub io: IoConfig,
    pub sharding: ShardingConfig,
    pub indexing: IndexingQueueConfig,
    pub commit_strategy: CommitStrategy,
    pub refresh_strategy: RefreshStrategy,
    pub schema_management: SchemaManagementStrategy,
}

impl IndexConfig {
    pub fn validate(&self, index: &str) -> Result<()> {
        if self.io.writer_memory_budget_bytes < MIN_WRITER_MEMORY_BUDGET_BYTES {
            return Err(StackshardError::Config(format!(
                "index '{}': io.writer_memory_budget_bytes must be at least {}, got {}",
                index, MIN_WRITER_MEMORY_BUDGET_BYTES, self.io.writer_memory_budget_bytes
            )));
        }
        if self.io.strategy == IoStrategyName::NearRealTime {
            if self.io.commit_interval_ms == 0 {
                return Err(StackshardError::Config(format!(
                    "index '{}': io.commit_interval_ms must be positive for the near-real-time strategy",
                    index
                )));
            }
            if self.io.refresh_interval_ms == 0 {
                return Err(StackshardError::Config(format!(
                    "index '{}': io.refresh_interval_ms must be positive for the near-real-time strategy",
                    index
                )));
            }
        }
        if self.indexing.max_batch_size == 0 {
            return Err(StackshardError::Config(format!(
                "index '{}': indexing.max_batch_size must be positive",
                index
            )));
        }
        if self.sharding.strategy == ShardingStrategyName::Hash
            && self.sharding.number_of_shards.unwrap_or(0) == 0
        {
            return Err(StackshardError::Config(format!(
                "index '{}': the hash sharding strategy requires sharding.number_of_shards >= 1",
                index
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub directory: DirectoryConfig,
    /// Upper bound on concurrently executing batches across all shards.
    /// Defaults to the available parallelism.
    pub thread_pool_size: Option<usize>,
    pub multi_tenancy: MultiTenancyMode,
    /// Settings for any index without an entry in `indexes`.
    pub index_defaults: IndexConfig,
    /// Per-index settings; an entry replaces `index_defaults` entirely.
    pub indexes: BTreeMap<String, IndexConfig>,
}

impl BackendConfig {
    /// Load a configuration file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StackshardError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: BackendConfig = serde_json::from_str(&content)
            .map_err(|e| StackshardError::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(
            "Loaded backend config from {}: directory={:?}, multi_tenancy={:?}, {} index override(s)",
            path.display(),
            config.directory.kind,
            config.multi_tenancy,
            config.indexes.len()
        );
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self> {
        let mut config = BackendConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn index_config(&self, index: &str) -> &IndexConfig {
        self.indexes.get(index).unwrap_or(&self.index_defaults)
    }

    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_pool_size == Some(0) {
            return Err(StackshardError::Config(
                "thread_pool_size must be positive".to_string(),
            ));
        }
        self.index_defaults.validate("<defaults>")?;
        for (name, index) in &self.indexes {
            index.validate(name)?;
        }
        Ok(())
    }

    /// Override settings from `STACKSHARD_*` variables. Index-level variables
    /// apply to `index_defaults`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_var("STACKSHARD_DIRECTORY_TYPE") {
            self.directory.kind = parse_enum("STACKSHARD_DIRECTORY_TYPE", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_DIRECTORY_ROOT") {
            self.directory.root = PathBuf::from(v);
        }
        if let Some(v) = env_var("STACKSHARD_THREAD_POOL_SIZE") {
            self.thread_pool_size = Some(parse_number("STACKSHARD_THREAD_POOL_SIZE", &v)?);
        }
        if let Some(v) = env_var("STACKSHARD_MULTI_TENANCY") {
            self.multi_tenancy = parse_enum("STACKSHARD_MULTI_TENANCY", &v)?;
        }

        let defaults = &mut self.index_defaults;
        if let Some(v) = env_var("STACKSHARD_IO_STRATEGY") {
            defaults.io.strategy = parse_enum("STACKSHARD_IO_STRATEGY", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_IO_COMMIT_INTERVAL_MS") {
            defaults.io.commit_interval_ms = parse_number("STACKSHARD_IO_COMMIT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_IO_REFRESH_INTERVAL_MS") {
            defaults.io.refresh_interval_ms =
                parse_number("STACKSHARD_IO_REFRESH_INTERVAL_MS", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_SHARDING_STRATEGY") {
            defaults.sharding.strategy = parse_enum("STACKSHARD_SHARDING_STRATEGY", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_SHARDING_NUMBER_OF_SHARDS") {
            defaults.sharding.number_of_shards =
                Some(parse_number("STACKSHARD_SHARDING_NUMBER_OF_SHARDS", &v)?);
        }
        // Comma-separated, e.g. "eu,us,apac".
        if let Some(v) = env_var("STACKSHARD_SHARDING_SHARD_IDENTIFIERS") {
            defaults.sharding.shard_identifiers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env_var("STACKSHARD_COMMIT_STRATEGY") {
            defaults.commit_strategy = parse_enum("STACKSHARD_COMMIT_STRATEGY", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_REFRESH_STRATEGY") {
            defaults.refresh_strategy = parse_enum("STACKSHARD_REFRESH_STRATEGY", &v)?;
        }
        if let Some(v) = env_var("STACKSHARD_MAX_BATCH_SIZE") {
            defaults.indexing.max_batch_size = parse_number("STACKSHARD_MAX_BATCH_SIZE", &v)?;
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_enum<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
        .map_err(|e| StackshardError::Config(format!("invalid value for {}: {}", key, e)))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        StackshardError::Config(format!("invalid value '{}' for {}: {}", raw, key, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: &[&str] = &[
        "STACKSHARD_DIRECTORY_TYPE",
        "STACKSHARD_DIRECTORY_ROOT",
        "STACKSHARD_THREAD_POOL_SIZE",
        "STACKSHARD_MULTI_TENANCY",
        "STACKSHARD_IO_STRATEGY",
        "STACKSHARD_IO_COMMIT_INTERVAL_MS",
        "STACKSHARD_IO_REFRESH_INTERVAL_MS",
        "STACKSHARD_SHARDING_STRATEGY",
        "STACKSHARD_SHARDING_NUMBER_OF_SHARDS",
        "STACKSHARD_SHARDING_SHARD_IDENTIFIERS",
        "STACKSHARD_COMMIT_STRATEGY",
        "STACKSHARD_REFRESH_STRATEGY",
        "STACKSHARD_MAX_BATCH_SIZE",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = BackendConfig::default();
        config.validate().unwrap();
        assert_eq!(config.index_defaults.io.strategy, IoStrategyName::NearRealTime);
        assert_eq!(config.index_defaults.sharding.strategy, ShardingStrategyName::None);
        assert!(config.thread_pool_size() >= 1);
    }

    #[test]
    #[serial]
    fn load_parses_file_and_index_overrides() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackshard.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            br#"{
                "directory": {"type": "local-heap"},
                "thread_pool_size": 2,
                "multi_tenancy": "discriminator",
                "indexes": {
                    "products": {
                        "io": {"strategy": "debug"},
                        "sharding": {"strategy": "hash", "number_of_shards": 3}
                    }
                }
            }"#,
        )
        .unwrap();

        let config = BackendConfig::load(&path).unwrap();
        assert_eq!(config.directory.kind, DirectoryKind::LocalHeap);
        assert_eq!(config.thread_pool_size(), 2);
        assert_eq!(config.multi_tenancy, MultiTenancyMode::Discriminator);
        let products = config.index_config("products");
        assert_eq!(products.io.strategy, IoStrategyName::Debug);
        assert_eq!(products.sharding.number_of_shards, Some(3));
        assert_eq!(
            config.index_config("other").io.strategy,
            IoStrategyName::NearRealTime
        );
    }

    #[test]
    #[serial]
    fn load_rejects_unknown_io_strategy() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"index_defaults": {"io": {"strategy": "eventually"}}}"#,
        )
        .unwrap();
        let err = BackendConfig::load(&path).unwrap_err();
        assert!(matches!(err, StackshardError::Config(ref m) if m.contains("eventually")));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = BackendConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, StackshardError::Config(_)));
    }

    #[test]
    fn hash_sharding_requires_shard_count() {
        let mut config = IndexConfig::default();
        config.sharding.strategy = ShardingStrategyName::Hash;
        assert!(config.validate("products").is_err());
        config.sharding.number_of_shards = Some(0);
        assert!(config.validate("products").is_err());
        config.sharding.number_of_shards = Some(4);
        config.validate("products").unwrap();
    }

    #[test]
    fn small_writer_budget_is_rejected() {
        let mut config = IndexConfig::default();
        config.io.writer_memory_budget_bytes = 1024;
        let err = config.validate("products").unwrap_err();
        assert!(err.to_string().contains("writer_memory_budget_bytes"));
    }

    #[test]
    fn zero_intervals_only_matter_for_near_real_time() {
        let mut config = IndexConfig::default();
        config.io.commit_interval_ms = 0;
        assert!(config.validate("products").is_err());
        config.io.strategy = IoStrategyName::Debug;
        config.validate("products").unwrap();
    }

    #[test]
    #[serial]
    fn env_overrides_apply_to_defaults() {
        clear_env();
        env::set_var("STACKSHARD_IO_STRATEGY", "debug");
        env::set_var("STACKSHARD_SHARDING_STRATEGY", "explicit");
        env::set_var("STACKSHARD_SHARDING_SHARD_IDENTIFIERS", "eu, us,,apac");
        env::set_var("STACKSHARD_THREAD_POOL_SIZE", "3");

        let config = BackendConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.index_defaults.io.strategy, IoStrategyName::Debug);
        assert_eq!(
            config.index_defaults.sharding.strategy,
            ShardingStrategyName::Explicit
        );
        assert_eq!(
            config.index_defaults.sharding.shard_identifiers,
            vec!["eu".to_string(), "us".to_string(), "apac".to_string()]
        );
        assert_eq!(config.thread_pool_size(), 3);
    }

    #[test]
    #[serial]
    fn malformed_env_values_are_config_errors() {
        clear_env();
        env::set_var("STACKSHARD_IO_STRATEGY", "fast");
        let err = BackendConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, StackshardError::Config(ref m) if m.contains("STACKSHARD_IO_STRATEGY")));

        env::set_var("STACKSHARD_THREAD_POOL_SIZE", "many");
        let err = BackendConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, StackshardError::Config(ref m) if m.contains("many")));

        env::set_var("STACKSHARD_THREAD_POOL_SIZE", "0");
        let err = BackendConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, StackshardError::Config(_)));
    }
}
