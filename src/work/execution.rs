//! Caller-facing write entry points.
//!
//! All of them are created through [`LogicalIndex`], which checks the
//! session's tenant before handing one out. From then on every operation is
//! routed to its shard and queued; none of them block on the engine.

use crate::error::{Result, StackshardError};
use crate::index::logical::LogicalIndex;
use crate::index::shard::Shard;
use crate::orchestration::{BatchedWork, WorkHandle};
use crate::reporting::FailureCollector;
use crate::types::{CommitStrategy, Document, DocumentId, RefreshStrategy};
use crate::work::{IndexingWork, WorkOperation};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

fn bind(
    shard: &Shard,
    operation: WorkOperation,
    tenant_id: Option<&str>,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
) -> (BatchedWork, WorkHandle) {
    BatchedWork::new(
        IndexingWork::new(operation, shard.context().clone())
            .with_tenant(tenant_id)
            .with_strategies(commit, refresh),
    )
}

/// Single-document operations, each queued on its shard's serial
/// orchestrator as soon as it is submitted.
///
/// Writes share the shard's queue with indexing plans, so every write to a
/// shard applies in submission order whichever entry point sent it.
#[derive(Debug, Clone)]
pub struct Indexer {
    index: Arc<LogicalIndex>,
    tenant_id: Option<String>,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
}

impl Indexer {
    pub(crate) fn new(
        index: Arc<LogicalIndex>,
        tenant_id: Option<String>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Self {
        Indexer {
            index,
            tenant_id,
            commit,
            refresh,
        }
    }

    /// Override the index's default commit and refresh strategies.
    pub fn with_strategies(mut self, commit: CommitStrategy, refresh: RefreshStrategy) -> Self {
        self.commit = commit;
        self.refresh = refresh;
        self
    }

    pub fn add(&self, doc: Document) -> WorkHandle {
        let (id, routing) = (doc.id.clone(), doc.routing_key.clone());
        self.submit(WorkOperation::Add(doc), &id, routing.as_deref())
    }

    pub fn add_or_update(&self, doc: Document) -> WorkHandle {
        let (id, routing) = (doc.id.clone(), doc.routing_key.clone());
        self.submit(WorkOperation::AddOrUpdate(doc), &id, routing.as_deref())
    }

    /// `routing_key` must be the one the document was indexed with, if any.
    pub fn delete(&self, document_id: &str, routing_key: Option<&str>) -> WorkHandle {
        let operation = WorkOperation::Delete {
            document_id: document_id.to_string(),
        };
        self.submit(operation, document_id, routing_key)
    }

    fn submit(&self, operation: WorkOperation, id: &str, routing: Option<&str>) -> WorkHandle {
        match self.index.route(id, routing) {
            Ok(shard) => {
                let (unit, handle) = bind(
                    shard,
                    operation,
                    self.tenant_id.as_deref(),
                    self.commit,
                    self.refresh,
                );
                shard.serial().submit(unit);
                handle
            }
            Err(e) => WorkHandle::failed(e),
        }
    }
}

#[derive(Debug)]
struct PlannedWork {
    document_id: DocumentId,
    operation: WorkOperation,
    routing: Option<String>,
}

/// A list of document operations executed together.
///
/// Nothing is queued until [`execute`](IndexingPlan::execute). The
/// operations are then submitted to each target shard's serial orchestrator
/// in the order they were added, so the shard applies them in that order,
/// batched with whatever else is queued there.
#[derive(Debug)]
pub struct IndexingPlan {
    id: Uuid,
    index: Arc<LogicalIndex>,
    tenant_id: Option<String>,
    commit: CommitStrategy,
    refresh: RefreshStrategy,
    works: Vec<PlannedWork>,
}

impl IndexingPlan {
    pub(crate) fn new(
        index: Arc<LogicalIndex>,
        tenant_id: Option<String>,
        commit: CommitStrategy,
        refresh: RefreshStrategy,
    ) -> Self {
        IndexingPlan {
            id: Uuid::new_v4(),
            index,
            tenant_id,
            commit,
            refresh,
            works: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn with_strategies(mut self, commit: CommitStrategy, refresh: RefreshStrategy) -> Self {
        self.commit = commit;
        self.refresh = refresh;
        self
    }

    pub fn len(&self) -> usize {
        self.works.len()
    }

    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }

    pub fn add(&mut self, doc: Document) -> &mut Self {
        let routing = doc.routing_key.clone();
        self.push(WorkOperation::Add(doc), routing)
    }

    pub fn add_or_update(&mut self, doc: Document) -> &mut Self {
        let routing = doc.routing_key.clone();
        self.push(WorkOperation::AddOrUpdate(doc), routing)
    }

    pub fn delete(&mut self, document_id: &str, routing_key: Option<&str>) -> &mut Self {
        let operation = WorkOperation::Delete {
            document_id: document_id.to_string(),
        };
        self.push(operation, routing_key.map(str::to_string))
    }

    fn push(&mut self, operation: WorkOperation, routing: Option<String>) -> &mut Self {
        self.works.push(PlannedWork {
            document_id: operation.document_id().unwrap_or_default().to_string(),
            operation,
            routing,
        });
        self
    }

    /// Submit every operation and wait for all of them.
    ///
    /// Operations that cannot be routed fail in the report without being
    /// queued; the others are unaffected.
    pub async fn execute(self) -> IndexingPlanReport {
        let total = self.works.len();
        tracing::debug!(
            "[plan {}] executing {} work(s) on index '{}'",
            self.id,
            total,
            self.index.name()
        );

        let mut pending: Vec<(DocumentId, std::result::Result<WorkHandle, StackshardError>)> =
            Vec::with_capacity(total);
        for planned in self.works {
            let submitted = self
                .index
                .route(&planned.document_id, planned.routing.as_deref())
                .map(|shard| {
                    let (unit, handle) = bind(
                        shard,
                        planned.operation,
                        self.tenant_id.as_deref(),
                        self.commit,
                        self.refresh,
                    );
                    shard.serial().submit(unit);
                    handle
                });
            pending.push((planned.document_id, submitted));
        }

        let mut failures = Vec::new();
        for (document_id, submitted) in pending {
            let result = match submitted {
                Ok(handle) => handle.await,
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                failures.push(FailedWork { document_id, error });
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                "[plan {}] {} of {} work(s) failed on index '{}'",
                self.id,
                failures.len(),
                total,
                self.index.name()
            );
        }
        IndexingPlanReport {
            plan_id: self.id,
            total,
            failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedWork {
    pub document_id: DocumentId,
    pub error: StackshardError,
}

/// Outcome of an [`IndexingPlan`]: which documents failed, and why.
#[derive(Debug, Clone)]
pub struct IndexingPlanReport {
    pub plan_id: Uuid,
    pub total: usize,
    pub failures: Vec<FailedWork>,
}

impl IndexingPlanReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_document_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.document_id.as_str()).collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            plan_id: self.plan_id.to_string(),
            total: self.total,
            succeeded: self.total - self.failures.len(),
            failed: self
                .failures
                .iter()
                .map(|f| (f.document_id.clone(), f.error.to_string()))
                .collect(),
        }
    }
}

/// Serializable view of an [`IndexingPlanReport`].
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub plan_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<(String, String)>,
}

/// Whole-shard maintenance: flush, refresh, merge and purge.
///
/// Each call targets every running shard (purge: the shards the routing
/// keys resolve to), goes through the parallel orchestrators, and reports
/// every shard's failure at once.
#[derive(Debug, Clone)]
pub struct Workspace {
    index: Arc<LogicalIndex>,
    tenant_id: Option<String>,
}

impl Workspace {
    pub(crate) fn new(index: Arc<LogicalIndex>, tenant_id: Option<String>) -> Self {
        Workspace { index, tenant_id }
    }

    pub async fn flush(&self) -> Result<()> {
        let shards = self.index.shards().collect();
        self.run("Flush", WorkOperation::Flush, shards).await
    }

    pub async fn refresh(&self) -> Result<()> {
        let shards = self.index.shards().collect();
        self.run("Refresh", WorkOperation::Refresh, shards).await
    }

    pub async fn merge_segments(&self) -> Result<()> {
        let shards = self.index.shards().collect();
        self.run("Segment merge", WorkOperation::MergeSegments, shards)
            .await
    }

    /// Delete every document of the session's tenant, or only those with one
    /// of `routing_keys` when some are given.
    pub async fn purge(&self, routing_keys: &[String]) -> Result<()> {
        let shards = self.index.shards_for(routing_keys)?;
        let operation = WorkOperation::Purge {
            routing_keys: routing_keys.to_vec(),
        };
        self.run("Purge", operation, shards).await
    }

    async fn run(&self, what: &str, operation: WorkOperation, shards: Vec<&Shard>) -> Result<()> {
        let pending: Vec<(&Shard, WorkHandle)> = shards
            .into_iter()
            .map(|shard| {
                let (unit, handle) = bind(
                    shard,
                    operation.clone(),
                    self.tenant_id.as_deref(),
                    CommitStrategy::None,
                    RefreshStrategy::None,
                );
                shard.parallel().submit(unit);
                (shard, handle)
            })
            .collect();

        let mut collector = FailureCollector::new();
        for (shard, handle) in pending {
            if let Err(e) = handle.await {
                collector.add(shard.context().clone(), e);
            }
        }
        collector.into_result_for(what, self.index.name())
    }
}
