//! Index startup and shutdown across shards.

mod common;

use common::{hashed, heap_config, id_on_shard, on_disk, product};
use stackshard::index::ShardState;
use stackshard::{IndexManager, SessionContext, StackshardError};
use std::path::Path;
use tempfile::TempDir;

/// A regular file where shard "1" needs its directory.
fn block_shard(root: &Path, index: &str, shard: &str) {
    std::fs::create_dir_all(root.join(index)).unwrap();
    std::fs::write(root.join(index).join(shard), b"not a directory").unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn strict_startup_reports_exactly_the_failed_shard() {
    let dir = TempDir::new().unwrap();
    block_shard(dir.path(), "products", "1");
    let manager = IndexManager::new(on_disk(hashed(heap_config(), 3), dir.path())).unwrap();

    let err = manager.start_index("products").await.unwrap_err();
    let StackshardError::StartupFailed(report) = &err else {
        panic!("expected a startup failure, got {err}");
    };
    assert_eq!(report.failed_shards(), vec![Some("1".to_string())]);
    assert!(matches!(report.failures[0].error, StackshardError::Io(_)));
    assert!(err
        .to_string()
        .starts_with("Startup of index 'products' failed with 1 failure(s)"));
    assert!(err.to_string().contains("shard '1'"));

    // Shards 0 and 2 were created, then released again.
    assert!(dir.path().join("products/0/meta.json").exists());
    assert!(dir.path().join("products/2/meta.json").exists());
    assert!(manager.index_names().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partial_startup_keeps_the_healthy_shards_usable() {
    let dir = TempDir::new().unwrap();
    block_shard(dir.path(), "products", "1");
    let manager = IndexManager::new(on_disk(hashed(heap_config(), 3), dir.path())).unwrap();

    let (index, report) = manager.start_index_partial("products").await.unwrap();
    let report = report.unwrap();
    assert_eq!(report.failed_shards(), vec![Some("1".to_string())]);
    assert_eq!(index.failed_shards(), vec![Some("1".to_string())]);

    let indexer = index.create_indexer(&SessionContext::new()).unwrap();
    for shard in ["0", "2"] {
        let id = id_on_shard(&index, shard);
        indexer.add(product(&id, "Widget")).await.unwrap();
    }
    let err = indexer
        .add(product(&id_on_shard(&index, "1"), "Widget"))
        .await
        .unwrap_err();
    assert!(matches!(err, StackshardError::ShardUnavailable { ref shard, .. } if shard == "1"));

    let search = index
        .create_search_query_builder(&SessionContext::new())
        .unwrap();
    assert_eq!(search.fetch_total_hit_count().unwrap(), 2);

    let states: Vec<_> = index.status().shards.iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![ShardState::Running, ShardState::Failed, ShardState::Running]
    );
    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partial_startup_without_any_shard_fails() {
    let dir = TempDir::new().unwrap();
    block_shard(dir.path(), "products", "default");
    let manager = IndexManager::new(on_disk(heap_config(), dir.path())).unwrap();

    let err = manager.start_index_partial("products").await.unwrap_err();
    assert!(matches!(err, StackshardError::StartupFailed(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn schema_mismatch_fails_startup_per_shard() {
    let dir = TempDir::new().unwrap();
    // A foreign tantivy index sitting where shard "0" lives.
    let path = dir.path().join("products").join("0");
    std::fs::create_dir_all(&path).unwrap();
    let mut builder = tantivy::schema::Schema::builder();
    builder.add_text_field("title", tantivy::schema::TEXT);
    tantivy::Index::create_in_dir(&path, builder.build()).unwrap();

    let manager = IndexManager::new(on_disk(hashed(heap_config(), 2), dir.path())).unwrap();
    let err = manager.start_index("products").await.unwrap_err();
    let StackshardError::StartupFailed(report) = err.original() else {
        panic!("expected a startup failure, got {err}");
    };
    assert_eq!(report.failed_shards(), vec![Some("0".to_string())]);
    assert!(matches!(
        report.failures[0].error.root_cause(),
        StackshardError::SchemaMismatch { .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drop_and_create_and_drop_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let mut config = on_disk(hashed(heap_config(), 2), dir.path());
    config.index_defaults.schema_management =
        stackshard::config::SchemaManagementStrategy::DropAndCreateAndDrop;
    let manager = IndexManager::new(config).unwrap();

    let index = manager.start_index("products").await.unwrap();
    index
        .create_indexer(&SessionContext::new())
        .unwrap()
        .add(product("1", "Widget"))
        .await
        .unwrap();
    assert!(index.status().shards.iter().all(|s| s.exists));

    manager.shutdown().await.unwrap();
    assert!(!dir.path().join("products/0/meta.json").exists());
    assert!(!dir.path().join("products/1/meta.json").exists());
}
