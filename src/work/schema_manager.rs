use crate::config::SchemaManagementStrategy;
use crate::error::{Result, StackshardError};
use crate::index::logical::LogicalIndex;
use crate::index::shard::Shard;
use crate::orchestration::{BatchedWork, WorkHandle};
use crate::reporting::FailureCollector;
use crate::work::{IndexingWork, WorkOperation};
use std::sync::Arc;

/// Creates, validates and drops the physical index of every shard.
///
/// Steps go through each shard's parallel orchestrator. All steps for one
/// shard share its resource name as queuing key, so they run one after the
/// other on that shard while different shards proceed concurrently.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    index: Arc<LogicalIndex>,
}

impl SchemaManager {
    pub(crate) fn new(index: Arc<LogicalIndex>) -> Self {
        SchemaManager { index }
    }

    pub async fn create_if_missing(&self) -> Result<()> {
        self.run("Schema creation", CREATE).await
    }

    pub async fn create_or_validate(&self) -> Result<()> {
        self.run("Schema creation or validation", CREATE_OR_VALIDATE)
            .await
    }

    pub async fn drop_and_create(&self) -> Result<()> {
        self.run("Schema recreation", DROP_AND_CREATE).await
    }

    pub async fn drop_if_existing(&self) -> Result<()> {
        self.run("Schema drop", DROP).await
    }

    pub async fn validate(&self) -> Result<()> {
        self.run("Schema validation", VALIDATE).await
    }

    async fn run(&self, operation: &str, steps: &[WorkOperation]) -> Result<()> {
        let failures = apply_steps(self.index.shards(), steps).await;
        let mut collector = FailureCollector::new();
        for (shard, error) in failures {
            collector.add(shard.context().clone(), error);
        }
        collector.into_result_for(operation, self.index.name())
    }
}

const NOTHING: &[WorkOperation] = &[];
const CREATE: &[WorkOperation] = &[WorkOperation::CreateIfMissing];
const CREATE_OR_VALIDATE: &[WorkOperation] =
    &[WorkOperation::CreateIfMissing, WorkOperation::Validate];
const DROP: &[WorkOperation] = &[WorkOperation::DropIfExisting];
const DROP_AND_CREATE: &[WorkOperation] =
    &[WorkOperation::DropIfExisting, WorkOperation::CreateIfMissing];
const VALIDATE: &[WorkOperation] = &[WorkOperation::Validate];

/// Steps run at startup for a schema management strategy.
pub(crate) fn startup_steps(strategy: SchemaManagementStrategy) -> &'static [WorkOperation] {
    match strategy {
        SchemaManagementStrategy::None => NOTHING,
        SchemaManagementStrategy::CreateOrValidate => CREATE_OR_VALIDATE,
        SchemaManagementStrategy::DropAndCreate
        | SchemaManagementStrategy::DropAndCreateAndDrop => DROP_AND_CREATE,
    }
}

/// Steps run when an index stops.
pub(crate) fn shutdown_steps(strategy: SchemaManagementStrategy) -> &'static [WorkOperation] {
    match strategy {
        SchemaManagementStrategy::DropAndCreateAndDrop => DROP,
        _ => NOTHING,
    }
}

/// Submit `steps` to every shard, then wait for all of them.
///
/// Returns the first failure of each shard that had one. Later steps on a
/// failed shard still run; only the first error is reported.
pub(crate) async fn apply_steps<'a>(
    shards: impl IntoIterator<Item = &'a Shard>,
    steps: &[WorkOperation],
) -> Vec<(&'a Shard, StackshardError)> {
    let mut pending: Vec<(&Shard, Vec<WorkHandle>)> = Vec::new();
    for shard in shards {
        let handles = steps
            .iter()
            .map(|step| {
                let (unit, handle) =
                    BatchedWork::new(IndexingWork::new(step.clone(), shard.context().clone()));
                shard.parallel().submit(unit);
                handle
            })
            .collect();
        pending.push((shard, handles));
    }

    let mut failures = Vec::new();
    for (shard, handles) in pending {
        let mut first = None;
        for handle in handles {
            if let Err(e) = handle.await {
                first.get_or_insert(e);
            }
        }
        if let Some(error) = first {
            tracing::warn!("schema management failed for {}: {}", shard.context(), error);
            failures.push((shard, error));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, DirectoryKind, IoStrategyName, ShardingStrategyName};
    use crate::index::manager::IndexManager;

    fn config(strategy: SchemaManagementStrategy) -> BackendConfig {
        let mut config = BackendConfig::default();
        config.directory.kind = DirectoryKind::LocalHeap;
        config.thread_pool_size = Some(2);
        config.index_defaults.io.strategy = IoStrategyName::Debug;
        config.index_defaults.schema_management = strategy;
        config.index_defaults.sharding.strategy = ShardingStrategyName::Hash;
        config.index_defaults.sharding.number_of_shards = Some(2);
        config
    }

    #[test]
    fn startup_steps_follow_the_strategy() {
        assert!(startup_steps(SchemaManagementStrategy::None).is_empty());
        assert_eq!(
            startup_steps(SchemaManagementStrategy::DropAndCreateAndDrop),
            &[WorkOperation::DropIfExisting, WorkOperation::CreateIfMissing]
        );
        assert!(shutdown_steps(SchemaManagementStrategy::DropAndCreate).is_empty());
        assert_eq!(
            shutdown_steps(SchemaManagementStrategy::DropAndCreateAndDrop),
            &[WorkOperation::DropIfExisting]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn validate_reports_every_missing_shard() {
        let manager = IndexManager::new(config(SchemaManagementStrategy::None)).unwrap();
        let index = manager.start_index("products").await.unwrap();

        let err = index.schema_manager().validate().await.unwrap_err();
        match &err {
            StackshardError::Failures(report) => {
                assert_eq!(report.operation, "Schema validation");
                assert_eq!(
                    report.failed_shards(),
                    vec![Some("0".to_string()), Some("1".to_string())]
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        index.schema_manager().create_or_validate().await.unwrap();
        index.schema_manager().validate().await.unwrap();
        index.schema_manager().drop_if_existing().await.unwrap();
        assert!(index.schema_manager().validate().await.is_err());
        index.schema_manager().drop_and_create().await.unwrap();
        index.schema_manager().validate().await.unwrap();
        manager.shutdown().await.unwrap();
    }
}
