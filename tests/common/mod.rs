use stackshard::config::{
    BackendConfig, DirectoryKind, IoStrategyName, SchemaManagementStrategy, ShardingStrategyName,
};
use stackshard::tenancy::MultiTenancyMode;
use stackshard::{Document, LogicalIndex};
use std::path::Path;

/// In-memory backend, debug IO, unsharded.
pub fn heap_config() -> BackendConfig {
    let mut config = BackendConfig::default();
    config.directory.kind = DirectoryKind::LocalHeap;
    config.thread_pool_size = Some(4);
    config.index_defaults.io.strategy = IoStrategyName::Debug;
    config.index_defaults.schema_management = SchemaManagementStrategy::CreateOrValidate;
    config
}

#[allow(dead_code)]
pub fn hashed(mut config: BackendConfig, shards: usize) -> BackendConfig {
    config.index_defaults.sharding.strategy = ShardingStrategyName::Hash;
    config.index_defaults.sharding.number_of_shards = Some(shards);
    config
}

#[allow(dead_code)]
pub fn on_disk(mut config: BackendConfig, root: &Path) -> BackendConfig {
    config.directory.kind = DirectoryKind::LocalFilesystem;
    config.directory.root = root.to_path_buf();
    config
}

#[allow(dead_code)]
pub fn near_real_time(mut config: BackendConfig) -> BackendConfig {
    config.index_defaults.io.strategy = IoStrategyName::NearRealTime;
    // Long enough that no timer fires during a test.
    config.index_defaults.io.commit_interval_ms = 3_600_000;
    config.index_defaults.io.refresh_interval_ms = 3_600_000;
    config
}

#[allow(dead_code)]
pub fn multi_tenant(mut config: BackendConfig) -> BackendConfig {
    config.multi_tenancy = MultiTenancyMode::Discriminator;
    config
}

/// First generated document id that the index routes to `shard`.
#[allow(dead_code)]
pub fn id_on_shard(index: &LogicalIndex, shard: &str) -> String {
    (0..10_000)
        .map(|n| format!("doc-{}", n))
        .find(|id| index.router().route(id, None).unwrap().as_deref() == Some(shard))
        .unwrap()
}

#[allow(dead_code)]
pub fn product(id: &str, title: &str) -> Document {
    Document::new(id).with_field("title", title)
}
