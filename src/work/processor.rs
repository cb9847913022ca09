use crate::error::{Result, StackshardError};
use crate::index::accessor::IndexAccessor;
use crate::index::io_strategy::IoStrategy;
use crate::orchestration::WorkProcessor;
use crate::types::{CommitStrategy, RefreshStrategy};
use crate::work::{IndexingWork, WorkOperation};
use std::sync::Arc;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;

/// Executes works against one shard's accessor.
///
/// Each work gets its own result; one failing document does not fail the
/// others. The batch is then closed through the IO strategy, and a failure
/// there fails the whole batch.
#[derive(Debug)]
pub struct ShardWorkProcessor {
    accessor: Arc<IndexAccessor>,
    io: Arc<dyn IoStrategy>,
}

impl ShardWorkProcessor {
    pub fn new(accessor: Arc<IndexAccessor>, io: Arc<dyn IoStrategy>) -> Self {
        ShardWorkProcessor { accessor, io }
    }

    fn apply(&self, work: &IndexingWork) -> Result<()> {
        let tenant = work.tenant_id.as_deref();
        match &work.operation {
            WorkOperation::Add(doc) => self.accessor.add(tenant, doc),
            WorkOperation::AddOrUpdate(doc) => self.accessor.add_or_update(tenant, doc),
            WorkOperation::Delete { document_id } => self.accessor.delete(tenant, document_id),
            WorkOperation::Purge { routing_keys } => self.accessor.delete_matching(|converter| {
                let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                if let Some(tenant_value) = converter.tenancy().tenant_filter(tenant) {
                    clauses.push((
                        Occur::Must,
                        Box::new(TermQuery::new(
                            converter.tenant_term(&tenant_value),
                            IndexRecordOption::Basic,
                        )),
                    ));
                }
                if !routing_keys.is_empty() {
                    let routing: Vec<(Occur, Box<dyn Query>)> = routing_keys
                        .iter()
                        .map(|key| {
                            let q: Box<dyn Query> = Box::new(TermQuery::new(
                                converter.routing_term(key),
                                IndexRecordOption::Basic,
                            ));
                            (Occur::Should, q)
                        })
                        .collect();
                    clauses.push((Occur::Must, Box::new(BooleanQuery::new(routing))));
                }
                if clauses.is_empty() {
                    Box::new(tantivy::query::AllQuery)
                } else {
                    Box::new(BooleanQuery::new(clauses))
                }
            }),
            WorkOperation::Flush => self.accessor.commit(),
            WorkOperation::Refresh => {
                self.accessor.commit()?;
                self.accessor.refresh()
            }
            WorkOperation::MergeSegments => self.accessor.merge_segments(),
            WorkOperation::CreateIfMissing => self.accessor.create_if_missing().map(|_| ()),
            WorkOperation::DropIfExisting => self.accessor.drop_if_existing().map(|_| ()),
            WorkOperation::Validate => self.accessor.validate(),
        }
    }
}

impl WorkProcessor for ShardWorkProcessor {
    fn execute(&self, works: &[IndexingWork]) -> Result<Vec<Result<()>>> {
        let results: Vec<Result<()>> = works
            .iter()
            .map(|work| {
                self.apply(work).map_err(|e| {
                    tracing::debug!("work failed: {}: {}", work.description(), e);
                    StackshardError::WorkFailed {
                        work: work.description(),
                        cause: Box::new(e),
                    }
                })
            })
            .collect();

        let commit = if works.iter().any(|w| w.commit == CommitStrategy::Force) {
            CommitStrategy::Force
        } else {
            CommitStrategy::None
        };
        let refresh = if works.iter().any(|w| w.refresh == RefreshStrategy::Force) {
            RefreshStrategy::Force
        } else {
            RefreshStrategy::None
        };

        // Nothing to close after a drop, or before the index is created.
        if self.accessor.exists() {
            self.io
                .end_batch(&self.accessor, commit, refresh)
                .map_err(|e| StackshardError::WorkFailed {
                    work: format!(
                        "close batch of {} work(s) in {}",
                        works.len(),
                        self.accessor.context()
                    ),
                    cause: Box::new(e),
                })?;
        }
        Ok(results)
    }
}
