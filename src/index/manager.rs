use crate::config::BackendConfig;
use crate::error::{Result, StackshardError};
use crate::index::directory::{create_provider, DirectoryProvider};
use crate::index::io_strategy::create_io_strategy;
use crate::index::logical::{LogicalIndex, StartupMode};
use crate::index::shard::ShardDependencies;
use crate::index::sharding::{create_sharding_strategy, ShardRouter, ShardingStrategy};
use crate::orchestration::BackendThreads;
use crate::reporting::FailureReport;
use crate::tenancy::MultiTenancyStrategy;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Backend owning every started logical index.
///
/// `IndexManager` holds the configuration, the worker pool shared by all
/// shards of all indexes, the directory provider and the tenancy strategy.
/// Indexes are started by name; each gets its settings from
/// [`BackendConfig::index_config`].
///
/// Create one with [`IndexManager::new`] from inside a tokio runtime. It
/// returns `Arc<IndexManager>` and is meant to be shared.
///
/// # Examples
///
/// ```rust,no_run
/// use stackshard::{BackendConfig, Document, IndexManager, SessionContext};
///
/// # async fn run() -> stackshard::Result<()> {
/// let manager = IndexManager::new(BackendConfig::from_env()?)?;
/// let products = manager.start_index("products").await?;
///
/// let indexer = products.create_indexer(&SessionContext::new())?;
/// indexer.add(Document::new("1").with_field("title", "Widget")).await?;
///
/// manager.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct IndexManager {
    config: BackendConfig,
    threads: BackendThreads,
    provider: Arc<dyn DirectoryProvider>,
    tenancy: Arc<dyn MultiTenancyStrategy>,
    indexes: DashMap<String, Arc<LogicalIndex>>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("threads", &self.threads)
            .field("provider", &self.provider)
            .field("indexes", &self.index_names())
            .finish()
    }
}

impl IndexManager {
    /// Validate `config` and build the shared pool and directory provider.
    pub fn new(config: BackendConfig) -> Result<Arc<Self>> {
        let provider = create_provider(&config.directory);
        Self::with_directory_provider(config, provider)
    }

    pub fn with_directory_provider(
        config: BackendConfig,
        provider: Arc<dyn DirectoryProvider>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let threads = BackendThreads::new(config.thread_pool_size())?;
        let tenancy = config.multi_tenancy.create_strategy();
        tracing::info!(
            "IndexManager ready: {} worker(s), directory {:?}, multi-tenancy {:?}",
            threads.size(),
            config.directory.kind,
            config.multi_tenancy
        );
        Ok(Arc::new(IndexManager {
            config,
            threads,
            provider,
            tenancy,
            indexes: DashMap::new(),
        }))
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Start an index with the configured sharding strategy. Any shard
    /// failure fails the whole index.
    pub async fn start_index(&self, name: &str) -> Result<Arc<LogicalIndex>> {
        let strategy = create_sharding_strategy(&self.config.index_config(name).sharding);
        let (index, _) = self.start(name, strategy, StartupMode::Strict).await?;
        Ok(index)
    }

    /// Start an index with a caller-provided sharding strategy.
    pub async fn start_index_with_sharding(
        &self,
        name: &str,
        strategy: Box<dyn ShardingStrategy>,
    ) -> Result<Arc<LogicalIndex>> {
        let (index, _) = self.start(name, strategy, StartupMode::Strict).await?;
        Ok(index)
    }

    /// Start an index with whichever shards succeed.
    ///
    /// Returns the index and, if some shards failed, the report listing them.
    /// Fails only when no shard could be started or the configuration is
    /// invalid.
    pub async fn start_index_partial(
        &self,
        name: &str,
    ) -> Result<(Arc<LogicalIndex>, Option<FailureReport>)> {
        let strategy = create_sharding_strategy(&self.config.index_config(name).sharding);
        self.start(name, strategy, StartupMode::Partial).await
    }

    async fn start(
        &self,
        name: &str,
        strategy: Box<dyn ShardingStrategy>,
        mode: StartupMode,
    ) -> Result<(Arc<LogicalIndex>, Option<FailureReport>)> {
        if self.indexes.contains_key(name) {
            return Err(StackshardError::IndexAlreadyExists(name.to_string()));
        }
        let config = self.config.index_config(name).clone();
        config.validate(name)?;
        let router = ShardRouter::initialize(name, &config.sharding, strategy)?;

        let deps = ShardDependencies {
            threads: self.threads.clone(),
            provider: self.provider.clone(),
            tenancy: self.tenancy.clone(),
            io: create_io_strategy(&config.io),
            config,
        };
        let (index, report) = LogicalIndex::start(name, router, &deps, mode).await?;
        let index = Arc::new(index);

        match self.indexes.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(index.clone());
                Ok((index, report))
            }
            Entry::Occupied(_) => {
                // Lost a race with a concurrent start of the same name.
                let error = StackshardError::IndexAlreadyExists(name.to_string());
                match index.stop().await {
                    Ok(()) => Err(error),
                    Err(e) => Err(StackshardError::Suppressed {
                        error: Box::new(error),
                        suppressed: vec![e],
                    }),
                }
            }
        }
    }

    pub fn index(&self, name: &str) -> Result<Arc<LogicalIndex>> {
        self.indexes
            .get(name)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| StackshardError::IndexNotFound(name.to_string()))
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Stop one index and forget it. Handles already given out reject new work.
    pub async fn stop_index(&self, name: &str) -> Result<()> {
        let (_, index) = self
            .indexes
            .remove(name)
            .ok_or_else(|| StackshardError::IndexNotFound(name.to_string()))?;
        index.stop().await
    }

    /// Stop every index. The first failure is returned with the others
    /// attached as suppressed.
    pub async fn shutdown(&self) -> Result<()> {
        let mut errors = Vec::new();
        for name in self.index_names() {
            let Some((_, index)) = self.indexes.remove(&name) else {
                continue;
            };
            match index.stop().await {
                Ok(()) => tracing::info!("[shutdown] Index '{}' stopped", name),
                Err(e) => {
                    tracing::error!("[shutdown] Index '{}' stopped with errors: {}", name, e);
                    errors.push(e);
                }
            }
        }
        if errors.is_empty() {
            return Ok(());
        }
        let error = errors.remove(0);
        if errors.is_empty() {
            Err(error)
        } else {
            Err(StackshardError::Suppressed {
                error: Box::new(error),
                suppressed: errors,
            })
        }
    }
}
