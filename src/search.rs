//! Read path.
//!
//! Queries run on the caller's thread against each shard's last refreshed
//! reader. They never enter the write orchestrators, so a long write queue
//! does not delay them; they see only what the IO strategy has made visible.

use crate::error::Result;
use crate::index::document::{DocumentConverter, StoredDocument};
use crate::index::logical::LogicalIndex;
use crate::index::shard::Shard;
use crate::types::ShardId;
use serde::Serialize;
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::TantivyDocument;

const DEFAULT_LIMIT: usize = 20;

/// Exact-match predicates understood by the shard schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchPredicate {
    MatchAll,
    Ids(Vec<String>),
    /// `field` is a dotted path for nested objects; array fields match on
    /// any element.
    FieldEquals { field: String, value: String },
    And(Vec<SearchPredicate>),
}

impl SearchPredicate {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SearchPredicate::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        SearchPredicate::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    fn to_query(&self, converter: &DocumentConverter) -> Box<dyn Query> {
        match self {
            SearchPredicate::MatchAll => Box::new(AllQuery),
            SearchPredicate::Ids(ids) => Box::new(BooleanQuery::new(
                ids.iter()
                    .map(|id| (Occur::Should, term_query(converter.id_term(id))))
                    .collect(),
            )),
            SearchPredicate::FieldEquals { field, value } => {
                term_query(converter.exact_term(field, value))
            }
            SearchPredicate::And(clauses) if clauses.is_empty() => Box::new(AllQuery),
            SearchPredicate::And(clauses) => Box::new(BooleanQuery::new(
                clauses
                    .iter()
                    .map(|c| (Occur::Must, c.to_query(converter)))
                    .collect(),
            )),
        }
    }
}

fn term_query(term: tantivy::Term) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, IndexRecordOption::Basic))
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub shard: ShardId,
    pub score: f32,
    pub document: StoredDocument,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub total_hit_count: usize,
    pub hits: Vec<SearchHit>,
}

/// Builds and runs one query over the index's shards.
#[derive(Debug, Clone)]
pub struct SearchQueryBuilder {
    index: Arc<LogicalIndex>,
    tenant_id: Option<String>,
    predicate: SearchPredicate,
    routing_keys: Vec<String>,
    limit: usize,
}

impl SearchQueryBuilder {
    pub(crate) fn new(index: Arc<LogicalIndex>, tenant_id: Option<String>) -> Self {
        SearchQueryBuilder {
            index,
            tenant_id,
            predicate: SearchPredicate::MatchAll,
            routing_keys: Vec::new(),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn predicate(mut self, predicate: SearchPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Only search the shards these routing keys resolve to.
    pub fn routing<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Matching documents, best score first across shards.
    pub fn fetch(&self) -> Result<SearchResult> {
        self.run(self.limit)
    }

    pub fn fetch_total_hit_count(&self) -> Result<usize> {
        Ok(self.run(0)?.total_hit_count)
    }

    /// The document with this id, read from the shard an
    /// [`Indexer`](crate::work::Indexer) would write it to.
    pub fn get(
        &self,
        document_id: &str,
        routing_key: Option<&str>,
    ) -> Result<Option<StoredDocument>> {
        let shard = self.index.route(document_id, routing_key)?;
        let by_id = SearchQueryBuilder {
            predicate: SearchPredicate::ids([document_id]),
            ..self.clone()
        };
        let mut result = SearchResult {
            total_hit_count: 0,
            hits: Vec::new(),
        };
        by_id.search_shard(shard, 1, &mut result)?;
        Ok(result.hits.into_iter().next().map(|hit| hit.document))
    }

    fn run(&self, limit: usize) -> Result<SearchResult> {
        let mut result = SearchResult {
            total_hit_count: 0,
            hits: Vec::new(),
        };
        for shard in self.index.shards_for(&self.routing_keys)? {
            self.search_shard(shard, limit, &mut result)?;
        }

        result.hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        result.hits.truncate(limit);
        tracing::trace!(
            "search on '{}' matched {} document(s), returning {}",
            self.index.name(),
            result.total_hit_count,
            result.hits.len()
        );
        Ok(result)
    }

    fn search_shard(&self, shard: &Shard, limit: usize, result: &mut SearchResult) -> Result<()> {
        // A shard without an index has nothing to match.
        let Some((searcher, converter)) = shard.accessor().searcher()? else {
            return Ok(());
        };
        let query = self.shard_query(&converter);

        if limit == 0 {
            result.total_hit_count += searcher.search(query.as_ref(), &Count)?;
            return Ok(());
        }

        let (count, top_docs) =
            searcher.search(query.as_ref(), &(Count, TopDocs::with_limit(limit)))?;
        result.total_hit_count += count;
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            result.hits.push(SearchHit {
                shard: shard.id().map(str::to_string),
                score,
                document: converter.from_tantivy(&doc)?,
            });
        }
        Ok(())
    }

    fn shard_query(&self, converter: &DocumentConverter) -> Box<dyn Query> {
        let query = self.predicate.to_query(converter);
        match converter.tenancy().tenant_filter(self.tenant_id.as_deref()) {
            Some(tenant) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, query),
                (Occur::Must, term_query(converter.tenant_term(&tenant))),
            ])),
            None => query,
        }
    }
}
