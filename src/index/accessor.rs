//! Owner of one shard's tantivy index, writer and reader.
//!
//! Writes go through the shard's orchestrators only; reads take a searcher
//! from the reader and never wait on the write queue. A shard whose index
//! does not exist yet (fresh storage, or dropped by schema management)
//! rejects writes and reads as empty until it is created.

use crate::error::{Result, StackshardError};
use crate::index::directory::DirectoryProvider;
use crate::index::document::DocumentConverter;
use crate::index::schema::ShardSchema;
use crate::reporting::EventContext;
use crate::tenancy::MultiTenancyStrategy;
use crate::types::Document;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tantivy::query::Query;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher};
use tokio::task::JoinHandle;

struct OpenShard {
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    converter: DocumentConverter,
}

pub struct IndexAccessor {
    context: EventContext,
    provider: Arc<dyn DirectoryProvider>,
    tenancy: Arc<dyn MultiTenancyStrategy>,
    writer_memory_budget_bytes: usize,
    state: RwLock<Option<OpenShard>>,
    /// Writes applied to the writer but not yet committed.
    pending: AtomicBool,
    closed: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IndexAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexAccessor")
            .field("context", &self.context)
            .field("exists", &self.exists())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl IndexAccessor {
    /// Acquire the shard's storage and open its index if it already exists.
    pub fn open(
        context: EventContext,
        provider: Arc<dyn DirectoryProvider>,
        tenancy: Arc<dyn MultiTenancyStrategy>,
        writer_memory_budget_bytes: usize,
    ) -> Result<Self> {
        provider.initialize(&context)?;
        let accessor = IndexAccessor {
            context,
            provider,
            tenancy,
            writer_memory_budget_bytes,
            state: RwLock::new(None),
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            background: Mutex::new(None),
        };
        if let Some(index) = accessor.provider.open_existing(&accessor.context)? {
            let shard = accessor.open_shard(index)?;
            *accessor.write_state() = Some(shard);
        }
        tracing::info!(
            "[{}] accessor opened (index exists: {})",
            accessor.context.resource_name(),
            accessor.exists()
        );
        Ok(accessor)
    }

    fn open_shard(&self, index: Index) -> Result<OpenShard> {
        let schema = ShardSchema::from_existing(index.schema()).map_err(|e| {
            StackshardError::SchemaMismatch {
                context: self.context.to_string(),
                message: e.to_string(),
            }
        })?;
        let writer: IndexWriter =
            index.writer_with_num_threads(1, self.writer_memory_budget_bytes)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(OpenShard {
            converter: DocumentConverter::new(schema, self.tenancy.clone()),
            index,
            writer: Mutex::new(writer),
            reader,
        })
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, Option<OpenShard>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, Option<OpenShard>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StackshardError::AccessorClosed(self.context.to_string()));
        }
        Ok(())
    }

    fn with_shard<T>(&self, f: impl FnOnce(&OpenShard) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        let state = self.read_state();
        match state.as_ref() {
            Some(shard) => f(shard),
            None => Err(StackshardError::SchemaMismatch {
                context: self.context.to_string(),
                message: "index does not exist".to_string(),
            }),
        }
    }

    pub fn exists(&self) -> bool {
        self.read_state().is_some()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn add(&self, tenant_id: Option<&str>, doc: &Document) -> Result<()> {
        self.with_shard(|shard| {
            let tantivy_doc = shard.converter.to_tantivy(tenant_id, doc)?;
            let writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.add_document(tantivy_doc)?;
            self.pending.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Replace any document with the same identifier (for the same tenant).
    pub fn add_or_update(&self, tenant_id: Option<&str>, doc: &Document) -> Result<()> {
        self.with_shard(|shard| {
            let tantivy_doc = shard.converter.to_tantivy(tenant_id, doc)?;
            let writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.delete_term(shard.converter.uid_term(tenant_id, &doc.id));
            writer.add_document(tantivy_doc)?;
            self.pending.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    pub fn delete(&self, tenant_id: Option<&str>, document_id: &str) -> Result<()> {
        self.with_shard(|shard| {
            let writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.delete_term(shard.converter.uid_term(tenant_id, document_id));
            self.pending.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Delete every document matching a query built from this shard's converter.
    pub fn delete_matching(
        &self,
        build: impl FnOnce(&DocumentConverter) -> Box<dyn Query>,
    ) -> Result<()> {
        self.with_shard(|shard| {
            let query = build(&shard.converter);
            let writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.delete_query(query)?;
            self.pending.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Persist pending writes. On failure the writer is rolled back to the
    /// last successful commit, discarding everything written since.
    pub fn commit(&self) -> Result<()> {
        self.with_shard(|shard| {
            if !self.pending.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            let mut writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            match writer.commit() {
                Ok(opstamp) => {
                    tracing::debug!(
                        "[{}] committed, opstamp={}",
                        self.context.resource_name(),
                        opstamp
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("[{}] commit failed: {}", self.context.resource_name(), e);
                    if let Err(rollback_err) = writer.rollback() {
                        tracing::error!(
                            "[{}] rollback after failed commit also failed: {}",
                            self.context.resource_name(),
                            rollback_err
                        );
                    }
                    Err(e.into())
                }
            }
        })
    }

    /// Make committed writes visible to new searchers.
    pub fn refresh(&self) -> Result<()> {
        self.with_shard(|shard| {
            shard.reader.reload()?;
            tracing::trace!("[{}] reader reloaded", self.context.resource_name());
            Ok(())
        })
    }

    /// Commit, merge every searchable segment into one, then collect
    /// files left behind by the merge.
    pub fn merge_segments(&self) -> Result<()> {
        self.commit()?;
        self.with_shard(|shard| {
            let segment_ids = shard.index.searchable_segment_ids()?;
            tracing::info!(
                "[{}] merging {} segments",
                self.context.resource_name(),
                segment_ids.len()
            );
            let mut writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            if segment_ids.len() > 1 {
                writer
                    .merge(&segment_ids)
                    .wait()
                    .map_err(|e| StackshardError::Tantivy(e.to_string()))?;
            }
            let gc = writer
                .garbage_collect_files()
                .wait()
                .map_err(|e| StackshardError::Tantivy(e.to_string()))?;
            tracing::info!(
                "[{}] merge done, gc removed {} files",
                self.context.resource_name(),
                gc.deleted_files.len()
            );
            drop(writer);
            shard.reader.reload()?;
            Ok(())
        })
    }

    /// Searcher over the last refreshed state, `None` if the index does not exist.
    pub fn searcher(&self) -> Result<Option<(Searcher, DocumentConverter)>> {
        self.ensure_open()?;
        Ok(self
            .read_state()
            .as_ref()
            .map(|shard| (shard.reader.searcher(), shard.converter.clone())))
    }

    /// Create the index if storage does not hold one. Returns whether it was created.
    pub fn create_if_missing(&self) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.write_state();
        if state.is_some() {
            return Ok(false);
        }
        let index = self
            .provider
            .create(&self.context, ShardSchema::build().tantivy().clone())?;
        *state = Some(self.open_shard(index)?);
        self.pending.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Close and delete the index if it exists. Returns whether it existed.
    pub fn drop_if_existing(&self) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.write_state();
        let Some(shard) = state.take() else {
            return Ok(false);
        };
        Self::release(shard);
        self.pending.store(false, Ordering::SeqCst);
        self.provider.remove(&self.context)?;
        tracing::info!("[{}] index dropped", self.context.resource_name());
        Ok(true)
    }

    /// Check the index exists and has the expected physical schema.
    pub fn validate(&self) -> Result<()> {
        self.with_shard(|shard| {
            let expected = ShardSchema::build();
            let problems = ShardSchema::diff(expected.tantivy(), &shard.index.schema());
            if problems.is_empty() {
                Ok(())
            } else {
                Err(StackshardError::SchemaMismatch {
                    context: self.context.to_string(),
                    message: problems.join("; "),
                })
            }
        })
    }

    pub fn set_background_task(&self, handle: JoinHandle<()>) {
        let mut slot = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop background work, commit what is pending and release the writer.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let mut state = self.write_state();
        let Some(shard) = state.take() else {
            tracing::info!("[{}] accessor closed", self.context.resource_name());
            return Ok(());
        };
        let result = if self.pending.swap(false, Ordering::SeqCst) {
            let mut writer = shard.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.commit().map(|_| ()).map_err(StackshardError::from)
        } else {
            Ok(())
        };
        Self::release(shard);
        match &result {
            Ok(()) => tracing::info!("[{}] accessor closed", self.context.resource_name()),
            Err(e) => tracing::error!(
                "[{}] final commit failed while closing: {}",
                self.context.resource_name(),
                e
            ),
        }
        result
    }

    fn release(shard: OpenShard) {
        let writer = shard.writer.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.wait_merging_threads() {
            tracing::warn!("merge threads ended with an error: {}", e);
        }
    }
}

impl Drop for IndexAccessor {
    fn drop(&mut self) {
        if let Some(handle) = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
