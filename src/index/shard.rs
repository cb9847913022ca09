use crate::config::IndexConfig;
use crate::error::Result;
use crate::index::accessor::IndexAccessor;
use crate::index::directory::DirectoryProvider;
use crate::index::io_strategy::IoStrategy;
use crate::orchestration::{BackendThreads, ParallelOrchestrator, SerialOrchestrator};
use crate::reporting::{EventContext, SuppressingCloser};
use crate::tenancy::MultiTenancyStrategy;
use crate::types::ShardId;
use crate::work::ShardWorkProcessor;
use std::sync::Arc;

/// Everything a shard needs from its index and backend.
#[derive(Clone)]
pub struct ShardDependencies {
    pub threads: BackendThreads,
    pub provider: Arc<dyn DirectoryProvider>,
    pub tenancy: Arc<dyn MultiTenancyStrategy>,
    pub io: Arc<dyn IoStrategy>,
    pub config: IndexConfig,
}

/// One physical partition: its accessor and the two orchestrators writing
/// to it. Built accessor first, torn down in reverse.
#[derive(Debug)]
pub struct Shard {
    context: EventContext,
    accessor: Arc<IndexAccessor>,
    serial: SerialOrchestrator,
    parallel: ParallelOrchestrator,
}

impl Shard {
    pub fn start(index: &str, id: ShardId, deps: &ShardDependencies) -> Result<Shard> {
        let context = EventContext::shard(index, id.as_deref());
        let accessor = Arc::new(IndexAccessor::open(
            context.clone(),
            deps.provider.clone(),
            deps.tenancy.clone(),
            deps.config.io.writer_memory_budget_bytes,
        )?);

        // From here on the accessor is held; release it if a later step fails.
        let release = |e| {
            SuppressingCloser::new(e)
                .push(|| accessor.close())
                .into_error()
        };

        deps.io.start(&accessor).map_err(release)?;
        let processor = Arc::new(ShardWorkProcessor::new(accessor.clone(), deps.io.clone()));
        let name = context.resource_name();
        let serial = SerialOrchestrator::start(
            name.clone(),
            deps.threads.clone(),
            processor.clone(),
            &deps.config.indexing,
        )
        .map_err(release)?;
        let parallel = ParallelOrchestrator::start(name, deps.threads.clone(), processor);

        Ok(Shard {
            context,
            accessor,
            serial,
            parallel,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.context.shard.as_deref()
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    pub fn accessor(&self) -> &Arc<IndexAccessor> {
        &self.accessor
    }

    pub fn serial(&self) -> &SerialOrchestrator {
        &self.serial
    }

    pub fn parallel(&self) -> &ParallelOrchestrator {
        &self.parallel
    }

    /// Drain both orchestrators, then close the accessor.
    pub async fn stop(&self) -> Result<()> {
        self.parallel.stop().await;
        self.serial.stop().await;
        let accessor = self.accessor.clone();
        tokio::task::spawn_blocking(move || accessor.close())
            .await
            .map_err(|e| crate::error::StackshardError::Internal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoStrategyName;
    use crate::error::StackshardError;
    use crate::index::directory::{LocalFilesystemDirectoryProvider, LocalHeapDirectoryProvider};
    use crate::index::io_strategy::create_io_strategy;
    use crate::orchestration::BatchedWork;
    use crate::tenancy::NoMultiTenancyStrategy;
    use crate::types::{CommitStrategy, Document, RefreshStrategy};
    use crate::work::{IndexingWork, WorkOperation};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn deps(config: IndexConfig) -> ShardDependencies {
        ShardDependencies {
            threads: BackendThreads::new(2).unwrap(),
            provider: Arc::new(LocalHeapDirectoryProvider),
            tenancy: Arc::new(NoMultiTenancyStrategy),
            io: create_io_strategy(&config.io),
            config,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shard_runs_work_and_stops_cleanly() {
        let mut config = IndexConfig::default();
        config.io.strategy = IoStrategyName::Debug;
        let shard = Shard::start("products", Some("0".into()), &deps(config)).unwrap();
        assert_eq!(shard.id(), Some("0"));

        let ctx = shard.context().clone();
        let (create, created) = BatchedWork::new(IndexingWork::new(
            WorkOperation::CreateIfMissing,
            ctx.clone(),
        ));
        shard.parallel().submit(create);
        created.await.unwrap();

        let (add, added) =
            BatchedWork::new(IndexingWork::new(WorkOperation::Add(Document::new("1")), ctx));
        shard.serial().submit(add);
        added.await.unwrap();

        shard.stop().await.unwrap();
        assert!(shard.accessor().is_closed());
    }

    /// Keeps the accessor it is started with, optionally leaves it with a
    /// commit that cannot succeed, then refuses to start.
    #[derive(Debug, Default)]
    struct RefusingIo {
        seen: Mutex<Option<Arc<IndexAccessor>>>,
        break_storage: Option<PathBuf>,
    }

    impl IoStrategy for RefusingIo {
        fn name(&self) -> IoStrategyName {
            IoStrategyName::Debug
        }

        fn start(&self, accessor: &Arc<IndexAccessor>) -> Result<()> {
            *self.seen.lock().unwrap() = Some(accessor.clone());
            if let Some(path) = &self.break_storage {
                accessor.create_if_missing()?;
                accessor.add(None, &Document::new("1"))?;
                std::fs::remove_dir_all(path).unwrap();
            }
            Err(StackshardError::Config("io refused".into()))
        }

        fn end_batch(
            &self,
            _accessor: &IndexAccessor,
            _commit: CommitStrategy,
            _refresh: RefreshStrategy,
        ) -> Result<()> {
            Ok(())
        }
    }

    impl RefusingIo {
        fn accessor(&self) -> Arc<IndexAccessor> {
            self.seen.lock().unwrap().clone().unwrap()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_step_after_open_releases_the_accessor() {
        let io = Arc::new(RefusingIo::default());
        let mut deps = deps(IndexConfig::default());
        deps.io = io.clone();

        let err = Shard::start("products", Some("0".into()), &deps).unwrap_err();
        assert!(matches!(err.original(), StackshardError::Config(_)));
        assert!(err.suppressed().is_empty());
        assert!(io.accessor().is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_release_is_attached_to_the_startup_error() {
        let dir = TempDir::new().unwrap();
        let provider = LocalFilesystemDirectoryProvider::new(dir.path());
        let shard_path = provider.shard_path(&EventContext::shard("products", Some("0")));
        let io = Arc::new(RefusingIo {
            break_storage: Some(shard_path),
            ..Default::default()
        });
        let mut deps = deps(IndexConfig::default());
        deps.provider = Arc::new(provider);
        deps.io = io.clone();

        let err = Shard::start("products", Some("0".into()), &deps).unwrap_err();
        assert!(matches!(err.original(), StackshardError::Config(_)));
        assert_eq!(err.suppressed().len(), 1);
        assert!(io.accessor().is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_queue_config_fails_startup() {
        let mut config = IndexConfig::default();
        config.io.strategy = IoStrategyName::Debug;
        config.indexing.max_batch_size = 0;
        let err = Shard::start("products", Some("0".into()), &deps(config)).unwrap_err();
        assert!(matches!(err.original(), StackshardError::Config(_)));
        assert!(err.suppressed().is_empty());
    }
}
