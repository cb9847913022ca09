//! Units of work executed against a shard.

pub mod execution;
pub mod processor;
pub mod schema_manager;

use crate::reporting::EventContext;
use crate::types::{CommitStrategy, Document, RefreshStrategy};

pub use execution::{
    FailedWork, Indexer, IndexingPlan, IndexingPlanReport, PlanSummary, Workspace,
};
pub use processor::ShardWorkProcessor;
pub use schema_manager::SchemaManager;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkOperation {
    Add(Document),
    AddOrUpdate(Document),
    Delete { document_id: String },
    /// Delete every document of the work's tenant, optionally only those
    /// with one of the given routing keys.
    Purge { routing_keys: Vec<String> },
    Flush,
    Refresh,
    MergeSegments,
    CreateIfMissing,
    DropIfExisting,
    Validate,
}

impl WorkOperation {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            WorkOperation::Add(doc) | WorkOperation::AddOrUpdate(doc) => Some(&doc.id),
            WorkOperation::Delete { document_id } => Some(document_id),
            _ => None,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            WorkOperation::Add(_) => "add document",
            WorkOperation::AddOrUpdate(_) => "add or update document",
            WorkOperation::Delete { .. } => "delete document",
            WorkOperation::Purge { .. } => "purge",
            WorkOperation::Flush => "flush",
            WorkOperation::Refresh => "refresh",
            WorkOperation::MergeSegments => "merge segments",
            WorkOperation::CreateIfMissing => "create index if missing",
            WorkOperation::DropIfExisting => "drop index if existing",
            WorkOperation::Validate => "validate index",
        }
    }
}

/// One operation bound to a shard, with the tenant and the durability and
/// visibility its caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingWork {
    pub operation: WorkOperation,
    pub context: EventContext,
    pub tenant_id: Option<String>,
    pub commit: CommitStrategy,
    pub refresh: RefreshStrategy,
}

impl IndexingWork {
    pub fn new(operation: WorkOperation, context: EventContext) -> Self {
        IndexingWork {
            operation,
            context,
            tenant_id: None,
            commit: CommitStrategy::None,
            refresh: RefreshStrategy::None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<&str>) -> Self {
        self.tenant_id = tenant_id.map(str::to_string);
        self
    }

    pub fn with_strategies(mut self, commit: CommitStrategy, refresh: RefreshStrategy) -> Self {
        self.commit = commit;
        self.refresh = refresh;
        self
    }

    /// Units sharing this key never run concurrently in a parallel orchestrator.
    /// Document keys are scoped by tenant.
    pub fn queuing_key(&self) -> String {
        match (self.operation.document_id(), &self.tenant_id) {
            (Some(id), Some(tenant)) => format!("{}/{}", tenant, id),
            (Some(id), None) => id.to_string(),
            (None, _) => self.context.resource_name(),
        }
    }

    /// E.g. `add document 'x' in index 'products', shard '2'`.
    pub fn description(&self) -> String {
        match self.operation.document_id() {
            Some(id) => format!("{} '{}' in {}", self.operation.verb(), id, self.context),
            None => format!("{} in {}", self.operation.verb(), self.context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_work_is_keyed_by_document_id() {
        let work = IndexingWork::new(
            WorkOperation::Add(Document::new("x")),
            EventContext::shard("products", Some("2")),
        );
        assert_eq!(work.queuing_key(), "x");
        assert_eq!(
            work.description(),
            "add document 'x' in index 'products', shard '2'"
        );
    }

    #[test]
    fn document_keys_of_different_tenants_differ() {
        let work = |tenant: &str| {
            IndexingWork::new(
                WorkOperation::Delete {
                    document_id: "1".into(),
                },
                EventContext::index("products"),
            )
            .with_tenant(Some(tenant))
        };
        assert_eq!(work("acme").queuing_key(), "acme/1");
        assert_ne!(work("acme").queuing_key(), work("globex").queuing_key());
    }

    #[test]
    fn management_work_is_keyed_by_resource() {
        let work = IndexingWork::new(
            WorkOperation::CreateIfMissing,
            EventContext::shard("products", Some("2")),
        );
        assert_eq!(work.queuing_key(), "products[2]");
        assert_eq!(
            work.description(),
            "create index if missing in index 'products', shard '2'"
        );
        let work = IndexingWork::new(WorkOperation::Flush, EventContext::index("products"));
        assert_eq!(work.queuing_key(), "products");
    }

    #[test]
    fn builders_set_tenant_and_strategies() {
        let work = IndexingWork::new(
            WorkOperation::Delete {
                document_id: "1".into(),
            },
            EventContext::index("products"),
        )
        .with_tenant(Some("acme"))
        .with_strategies(CommitStrategy::Force, RefreshStrategy::None);
        assert_eq!(work.tenant_id.as_deref(), Some("acme"));
        assert_eq!(work.commit, CommitStrategy::Force);
        assert_eq!(work.refresh, RefreshStrategy::None);
    }
}
