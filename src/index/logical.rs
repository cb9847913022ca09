//! A started logical index: its router and its shards.

use crate::config::{IndexConfig, IoStrategyName};
use crate::error::{Result, StackshardError};
use crate::index::shard::{Shard, ShardDependencies};
use crate::index::sharding::ShardRouter;
use crate::reporting::{EventContext, FailureCollector, FailureReport};
use crate::search::SearchQueryBuilder;
use crate::tenancy::MultiTenancyStrategy;
use crate::types::{SessionContext, ShardId};
use crate::work::schema_manager::{apply_steps, shutdown_steps, startup_steps};
use crate::work::{Indexer, IndexingPlan, SchemaManager, Workspace};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How startup treats shards that fail to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Any shard failure fails the index; started shards are stopped again.
    Strict,
    /// The index starts with the shards that succeeded, as long as there is
    /// at least one. Failed shards reject the work routed to them.
    Partial,
}

pub struct LogicalIndex {
    name: String,
    config: IndexConfig,
    router: ShardRouter,
    tenancy: Arc<dyn MultiTenancyStrategy>,
    /// Running shards, in declaration order.
    shards: IndexMap<ShardId, Shard>,
    failed: IndexMap<ShardId, StackshardError>,
    started_at: DateTime<Utc>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for LogicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalIndex")
            .field("name", &self.name)
            .field("shards", &self.shards.keys().collect::<Vec<_>>())
            .field("failed", &self.failed.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LogicalIndex {
    /// Start every shard, then apply the configured schema management.
    ///
    /// Each shard is attempted even when an earlier one failed. The returned
    /// report, if any, lists every failed shard.
    pub(crate) async fn start(
        name: &str,
        router: ShardRouter,
        deps: &ShardDependencies,
        mode: StartupMode,
    ) -> Result<(LogicalIndex, Option<FailureReport>)> {
        let mut collector = FailureCollector::new();
        let mut shards = IndexMap::new();
        let mut failed = IndexMap::new();

        for id in router.shard_ids() {
            match Shard::start(name, id.clone(), deps) {
                Ok(shard) => {
                    shards.insert(id, shard);
                }
                Err(e) => {
                    collector.add(EventContext::shard(name, id.as_deref()), e.clone());
                    failed.insert(id, e);
                }
            }
        }

        let steps = startup_steps(deps.config.schema_management);
        if !steps.is_empty() {
            let broken: Vec<(ShardId, StackshardError)> = apply_steps(shards.values(), steps)
                .await
                .into_iter()
                .map(|(shard, e)| (shard.id().map(str::to_string), e))
                .collect();
            for (id, error) in broken {
                let Some(shard) = shards.shift_remove(&id) else {
                    continue;
                };
                let error = match shard.stop().await {
                    Ok(()) => error,
                    Err(release) => StackshardError::Suppressed {
                        error: Box::new(error),
                        suppressed: vec![release],
                    },
                };
                collector.add(shard.context().clone(), error.clone());
                failed.insert(id, error);
            }
        }

        let report = collector.into_report("Startup", name);
        let index = LogicalIndex {
            name: name.to_string(),
            config: deps.config.clone(),
            router,
            tenancy: deps.tenancy.clone(),
            shards,
            failed,
            started_at: Utc::now(),
            stopped: AtomicBool::new(false),
        };

        match report {
            None => {
                tracing::info!(
                    "Index '{}' started with {} shard(s)",
                    name,
                    index.shards.len()
                );
                Ok((index, None))
            }
            Some(report) if mode == StartupMode::Partial && !index.shards.is_empty() => {
                tracing::warn!(
                    "Index '{}' started with {} of {} shard(s): {}",
                    name,
                    index.shards.len(),
                    index.shards.len() + index.failed.len(),
                    report
                );
                Ok((index, Some(report)))
            }
            Some(report) => {
                let mut suppressed = Vec::new();
                for shard in index.shards.values().rev() {
                    if let Err(e) = shard.stop().await {
                        suppressed.push(e);
                    }
                }
                let error = StackshardError::StartupFailed(report);
                if suppressed.is_empty() {
                    Err(error)
                } else {
                    Err(StackshardError::Suppressed {
                        error: Box::new(error),
                        suppressed,
                    })
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Every declared shard, including those that failed to start.
    pub fn shard_identifiers(&self) -> Vec<ShardId> {
        self.router.shard_ids()
    }

    pub fn failed_shards(&self) -> Vec<ShardId> {
        self.failed.keys().cloned().collect()
    }

    pub(crate) fn shards(&self) -> impl DoubleEndedIterator<Item = &Shard> {
        self.shards.values()
    }

    pub(crate) fn shard(&self, id: &ShardId) -> Result<&Shard> {
        if let Some(shard) = self.shards.get(id) {
            return Ok(shard);
        }
        let shard = id.clone().unwrap_or_default();
        if self.failed.contains_key(id) {
            Err(StackshardError::ShardUnavailable {
                index: self.name.clone(),
                shard,
            })
        } else {
            Err(StackshardError::UnknownShard {
                index: self.name.clone(),
                shard,
            })
        }
    }

    pub(crate) fn route(&self, document_id: &str, routing_key: Option<&str>) -> Result<&Shard> {
        let id = self.router.route(document_id, routing_key)?;
        self.shard(&id)
    }

    /// Running shards targeted by `routing_keys`; all of them when empty.
    pub(crate) fn shards_for(&self, routing_keys: &[String]) -> Result<Vec<&Shard>> {
        if routing_keys.is_empty() {
            return Ok(self.shards().collect());
        }
        self.router
            .route_all(routing_keys)?
            .iter()
            .map(|id| self.shard(id))
            .collect()
    }

    fn check_session(&self, session: &SessionContext) -> Result<()> {
        self.tenancy
            .check_tenant_id(session.tenant_id(), &EventContext::index(&self.name))
    }

    pub fn create_indexer(self: &Arc<Self>, session: &SessionContext) -> Result<Indexer> {
        self.check_session(session)?;
        Ok(Indexer::new(
            self.clone(),
            session.tenant_id.clone(),
            self.config.commit_strategy,
            self.config.refresh_strategy,
        ))
    }

    pub fn create_indexing_plan(
        self: &Arc<Self>,
        session: &SessionContext,
    ) -> Result<IndexingPlan> {
        self.check_session(session)?;
        Ok(IndexingPlan::new(
            self.clone(),
            session.tenant_id.clone(),
            self.config.commit_strategy,
            self.config.refresh_strategy,
        ))
    }

    pub fn create_workspace(self: &Arc<Self>, session: &SessionContext) -> Result<Workspace> {
        self.check_session(session)?;
        Ok(Workspace::new(self.clone(), session.tenant_id.clone()))
    }

    pub fn create_search_query_builder(
        self: &Arc<Self>,
        session: &SessionContext,
    ) -> Result<SearchQueryBuilder> {
        self.check_session(session)?;
        Ok(SearchQueryBuilder::new(self.clone(), session.tenant_id.clone()))
    }

    pub fn schema_manager(self: &Arc<Self>) -> SchemaManager {
        SchemaManager::new(self.clone())
    }

    pub fn status(&self) -> IndexStatus {
        let running = self.shards.iter().map(|(id, shard)| {
            let accessor = shard.accessor();
            ShardStatus {
                id: id.clone(),
                state: ShardState::Running,
                exists: accessor.exists(),
                pending_changes: accessor.has_pending_changes(),
                queued: shard.serial().queued(),
                batches_executed: shard.serial().batches_executed(),
                outstanding: shard.parallel().outstanding(),
                error: None,
            }
        });
        let failed = self.failed.iter().map(|(id, error)| ShardStatus {
            id: id.clone(),
            state: ShardState::Failed,
            exists: false,
            pending_changes: false,
            queued: 0,
            batches_executed: 0,
            outstanding: 0,
            error: Some(error.to_string()),
        });
        let mut shards: Vec<ShardStatus> = running.chain(failed).collect();
        let order = self.router.shard_ids();
        shards.sort_by_key(|s| order.iter().position(|id| *id == s.id));

        IndexStatus {
            name: self.name.clone(),
            io_strategy: self.config.io.strategy,
            started_at: self.started_at,
            stopped: self.stopped.load(Ordering::SeqCst),
            shards,
        }
    }

    /// Drain and close every shard, in reverse order of startup.
    ///
    /// With `drop-and-create-and-drop` schema management the shards' indexes
    /// are dropped first. Calling this again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut collector = FailureCollector::new();

        let steps = shutdown_steps(self.config.schema_management);
        if !steps.is_empty() {
            for (shard, e) in apply_steps(self.shards(), steps).await {
                collector.add(shard.context().clone(), e);
            }
        }

        for shard in self.shards().rev() {
            if let Err(e) = shard.stop().await {
                collector.add(shard.context().clone(), e);
            }
            tracing::info!("[shutdown] {} drained and closed", shard.context());
        }
        collector.into_result_for("Shutdown", &self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardState {
    Running,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardStatus {
    pub id: ShardId,
    pub state: ShardState,
    /// Whether the shard's physical index exists.
    pub exists: bool,
    pub pending_changes: bool,
    pub queued: usize,
    pub batches_executed: u64,
    pub outstanding: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub name: String,
    pub io_strategy: IoStrategyName,
    pub started_at: DateTime<Utc>,
    pub stopped: bool,
    pub shards: Vec<ShardStatus>,
}
