//! Shard orchestration for near-real-time tantivy indexes.
//!
//! A logical index is split into shards by a [`ShardingStrategy`]. Each shard
//! owns one tantivy writer behind an [`IndexAccessor`](index::IndexAccessor)
//! and two orchestrators sharing the backend's worker pool:
//!
//! - a serial orchestrator that drains the shard's write queue in order, a
//!   batch at a time, with at most one batch in flight;
//! - a parallel orchestrator for single-document and management work, which
//!   only serializes units sharing a queuing key.
//!
//! Every submitted unit returns a [`WorkHandle`] that resolves exactly once.
//! Reads go through [`SearchQueryBuilder`] and never wait on the queues.

pub mod config;
pub mod error;
pub mod index;
pub mod orchestration;
pub mod reporting;
pub mod search;
pub mod tenancy;
pub mod types;
pub mod work;

pub use config::{BackendConfig, IndexConfig};
pub use error::{Result, StackshardError};
pub use index::{IndexManager, IndexStatus, LogicalIndex, ShardingStrategy, StoredDocument};
pub use orchestration::WorkHandle;
pub use reporting::{EventContext, FailureReport};
pub use search::{SearchPredicate, SearchQueryBuilder, SearchResult};
pub use tenancy::MultiTenancyMode;
pub use types::{CommitStrategy, Document, FieldValue, RefreshStrategy, SessionContext};
pub use work::{Indexer, IndexingPlan, IndexingPlanReport, SchemaManager, Workspace};
