//! When pending writes are committed and when readers see them.
//!
//! The strategy is chosen once per index at startup. tantivy readers only
//! see committed segments, so a forced refresh always commits first.

use crate::config::{IoConfig, IoStrategyName};
use crate::error::{Result, StackshardError};
use crate::index::accessor::IndexAccessor;
use crate::types::{CommitStrategy, RefreshStrategy};
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub trait IoStrategy: Send + Sync + Debug {
    fn name(&self) -> IoStrategyName;

    /// Start whatever background work the strategy needs for one shard.
    fn start(&self, accessor: &Arc<IndexAccessor>) -> Result<()>;

    /// Close a batch: apply the strongest commit and refresh requested by
    /// any unit of the batch.
    fn end_batch(
        &self,
        accessor: &IndexAccessor,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Result<()>;
}

pub fn create_io_strategy(config: &IoConfig) -> Arc<dyn IoStrategy> {
    match config.strategy {
        IoStrategyName::NearRealTime => Arc::new(NearRealTimeIoStrategy {
            commit_interval: Duration::from_millis(config.commit_interval_ms),
            refresh_interval: Duration::from_millis(config.refresh_interval_ms),
        }),
        IoStrategyName::Debug => Arc::new(DebugIoStrategy),
    }
}

/// Commits and refreshes on timers. Writes become durable at the next commit
/// tick and visible at the next refresh tick after that, unless a unit
/// forces them sooner.
#[derive(Debug, Clone)]
pub struct NearRealTimeIoStrategy {
    pub commit_interval: Duration,
    pub refresh_interval: Duration,
}

impl IoStrategy for NearRealTimeIoStrategy {
    fn name(&self) -> IoStrategyName {
        IoStrategyName::NearRealTime
    }

    fn start(&self, accessor: &Arc<IndexAccessor>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            StackshardError::Config(format!(
                "the near-real-time IO strategy needs a tokio runtime: {}",
                e
            ))
        })?;
        let weak = Arc::downgrade(accessor);
        let name = accessor.context().resource_name();
        let commit_interval = self.commit_interval;
        let refresh_interval = self.refresh_interval;
        let handle = runtime.spawn(async move {
            run_timers(weak, name, commit_interval, refresh_interval).await;
        });
        accessor.set_background_task(handle);
        Ok(())
    }

    fn end_batch(
        &self,
        accessor: &IndexAccessor,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Result<()> {
        if commit == CommitStrategy::Force || refresh == RefreshStrategy::Force {
            accessor.commit()?;
        }
        if refresh == RefreshStrategy::Force {
            accessor.refresh()?;
        }
        Ok(())
    }
}

async fn run_timers(
    weak: Weak<IndexAccessor>,
    name: String,
    commit_interval: Duration,
    refresh_interval: Duration,
) {
    let mut commit_tick = tokio::time::interval(commit_interval);
    let mut refresh_tick = tokio::time::interval(refresh_interval);
    commit_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Both intervals fire immediately on the first tick.
    commit_tick.tick().await;
    refresh_tick.tick().await;

    tracing::debug!(
        "[NRT {}] timers started, commit every {}ms, refresh every {}ms",
        name,
        commit_interval.as_millis(),
        refresh_interval.as_millis()
    );
    loop {
        let committing = tokio::select! {
            _ = commit_tick.tick() => true,
            _ = refresh_tick.tick() => false,
        };
        let Some(accessor) = weak.upgrade() else {
            break;
        };
        if accessor.is_closed() {
            break;
        }
        if committing && !accessor.has_pending_changes() {
            tracing::trace!("[NRT {}] idle, nothing to commit", name);
            continue;
        }
        let result = tokio::task::spawn_blocking(move || {
            if committing {
                accessor.commit()
            } else {
                accessor.refresh()
            }
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(StackshardError::SchemaMismatch { .. })) => {
                tracing::trace!("[NRT {}] index does not exist, skipping tick", name);
            }
            Ok(Err(StackshardError::AccessorClosed(_))) => break,
            Ok(Err(e)) => tracing::warn!(
                "[NRT {}] scheduled {} failed: {}",
                name,
                if committing { "commit" } else { "refresh" },
                e
            ),
            Err(e) => tracing::error!("[NRT {}] timer task panicked: {}", name, e),
        }
    }
    tracing::debug!("[NRT {}] timers stopped", name);
}

/// Commits and refreshes at the end of every batch, so each resolved unit
/// is durable and visible. Meant for tests.
#[derive(Debug, Clone, Default)]
pub struct DebugIoStrategy;

impl IoStrategy for DebugIoStrategy {
    fn name(&self) -> IoStrategyName {
        IoStrategyName::Debug
    }

    fn start(&self, _accessor: &Arc<IndexAccessor>) -> Result<()> {
        Ok(())
    }

    fn end_batch(
        &self,
        accessor: &IndexAccessor,
        _commit: CommitStrategy,
        _refresh: RefreshStrategy,
    ) -> Result<()> {
        accessor.commit()?;
        accessor.refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::directory::LocalHeapDirectoryProvider;
    use crate::reporting::EventContext;
    use crate::tenancy::NoMultiTenancyStrategy;
    use crate::types::Document;
    use tantivy::collector::Count;
    use tantivy::query::AllQuery;

    fn accessor() -> Arc<IndexAccessor> {
        let accessor = IndexAccessor::open(
            EventContext::shard("products", Some("0")),
            Arc::new(LocalHeapDirectoryProvider),
            Arc::new(NoMultiTenancyStrategy),
            15_000_000,
        )
        .unwrap();
        accessor.create_if_missing().unwrap();
        Arc::new(accessor)
    }

    fn visible(accessor: &IndexAccessor) -> usize {
        let (searcher, _) = accessor.searcher().unwrap().unwrap();
        searcher.search(&AllQuery, &Count).unwrap()
    }

    #[test]
    fn create_picks_configured_strategy() {
        let mut config = IoConfig::default();
        assert_eq!(create_io_strategy(&config).name(), IoStrategyName::NearRealTime);
        config.strategy = IoStrategyName::Debug;
        assert_eq!(create_io_strategy(&config).name(), IoStrategyName::Debug);
    }

    #[test]
    fn debug_strategy_makes_every_batch_visible() {
        let accessor = accessor();
        accessor.add(None, &Document::new("1")).unwrap();
        DebugIoStrategy
            .end_batch(&accessor, CommitStrategy::None, RefreshStrategy::None)
            .unwrap();
        assert!(!accessor.has_pending_changes());
        assert_eq!(visible(&accessor), 1);
    }

    #[test]
    fn near_real_time_batch_end_only_honours_forced_strategies() {
        let strategy = NearRealTimeIoStrategy {
            commit_interval: Duration::from_secs(3600),
            refresh_interval: Duration::from_secs(3600),
        };
        let accessor = accessor();
        accessor.add(None, &Document::new("1")).unwrap();

        strategy
            .end_batch(&accessor, CommitStrategy::None, RefreshStrategy::None)
            .unwrap();
        assert!(accessor.has_pending_changes());

        strategy
            .end_batch(&accessor, CommitStrategy::Force, RefreshStrategy::None)
            .unwrap();
        assert!(!accessor.has_pending_changes());
        assert_eq!(visible(&accessor), 0);

        strategy
            .end_batch(&accessor, CommitStrategy::None, RefreshStrategy::Force)
            .unwrap();
        assert_eq!(visible(&accessor), 1);
    }

    #[tokio::test]
    async fn near_real_time_timers_commit_and_refresh() {
        let strategy = NearRealTimeIoStrategy {
            commit_interval: Duration::from_millis(20),
            refresh_interval: Duration::from_millis(20),
        };
        let accessor = accessor();
        strategy.start(&accessor).unwrap();
        accessor.add(None, &Document::new("1")).unwrap();

        let mut seen = 0;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            seen = visible(&accessor);
            if seen == 1 {
                break;
            }
        }
        assert_eq!(seen, 1);
        accessor.close().unwrap();
    }

    #[test]
    fn near_real_time_start_outside_runtime_is_a_config_error() {
        let strategy = NearRealTimeIoStrategy {
            commit_interval: Duration::from_millis(20),
            refresh_interval: Duration::from_millis(20),
        };
        let err = strategy.start(&accessor()).unwrap_err();
        assert!(matches!(err, StackshardError::Config(_)));
    }
}
