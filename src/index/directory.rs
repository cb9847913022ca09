//! Where shard indexes live.

use crate::config::{DirectoryConfig, DirectoryKind};
use crate::error::{Result, StackshardError};
use crate::reporting::EventContext;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tantivy::schema::Schema as TantivySchema;
use tantivy::Index;

/// Directory name used for the single shard of an unsharded index.
pub const DEFAULT_SHARD_DIRECTORY: &str = "default";

/// Provides storage for shard indexes.
///
/// `initialize` runs once per shard during index startup; it is the step
/// that fails when a shard's storage cannot be acquired.
pub trait DirectoryProvider: Send + Sync + Debug {
    fn initialize(&self, context: &EventContext) -> Result<()>;

    /// Open the shard index if one already exists in storage.
    fn open_existing(&self, context: &EventContext) -> Result<Option<Index>>;

    fn create(&self, context: &EventContext, schema: TantivySchema) -> Result<Index>;

    /// Delete the shard index from storage. The index must be closed first.
    fn remove(&self, context: &EventContext) -> Result<()>;
}

pub fn create_provider(config: &DirectoryConfig) -> Arc<dyn DirectoryProvider> {
    match config.kind {
        DirectoryKind::LocalHeap => Arc::new(LocalHeapDirectoryProvider),
        DirectoryKind::LocalFilesystem => {
            Arc::new(LocalFilesystemDirectoryProvider::new(config.root.clone()))
        }
    }
}

/// In-memory indexes. Nothing survives a restart, so there is never an
/// existing index to open.
#[derive(Debug, Default)]
pub struct LocalHeapDirectoryProvider;

impl DirectoryProvider for LocalHeapDirectoryProvider {
    fn initialize(&self, _context: &EventContext) -> Result<()> {
        Ok(())
    }

    fn open_existing(&self, _context: &EventContext) -> Result<Option<Index>> {
        Ok(None)
    }

    fn create(&self, _context: &EventContext, schema: TantivySchema) -> Result<Index> {
        Ok(Index::create_in_ram(schema))
    }

    fn remove(&self, _context: &EventContext) -> Result<()> {
        Ok(())
    }
}

/// One directory per shard: `<root>/<index>/<shard>`.
#[derive(Debug)]
pub struct LocalFilesystemDirectoryProvider {
    root: PathBuf,
}

impl LocalFilesystemDirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFilesystemDirectoryProvider { root: root.into() }
    }

    pub fn shard_path(&self, context: &EventContext) -> PathBuf {
        self.root
            .join(&context.index)
            .join(context.shard.as_deref().unwrap_or(DEFAULT_SHARD_DIRECTORY))
    }

    fn index_exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }
}

impl DirectoryProvider for LocalFilesystemDirectoryProvider {
    fn initialize(&self, context: &EventContext) -> Result<()> {
        let path = self.shard_path(context);
        std::fs::create_dir_all(&path).map_err(|e| {
            StackshardError::Io(format!("cannot create directory {}: {}", path.display(), e))
        })
    }

    fn open_existing(&self, context: &EventContext) -> Result<Option<Index>> {
        let path = self.shard_path(context);
        if !Self::index_exists(&path) {
            return Ok(None);
        }
        tracing::debug!("[{}] opening index at {}", context.resource_name(), path.display());
        Ok(Some(Index::open_in_dir(&path)?))
    }

    fn create(&self, context: &EventContext, schema: TantivySchema) -> Result<Index> {
        let path = self.shard_path(context);
        std::fs::create_dir_all(&path)?;
        tracing::info!("[{}] creating index at {}", context.resource_name(), path.display());
        Ok(Index::create_in_dir(&path, schema)?)
    }

    fn remove(&self, context: &EventContext) -> Result<()> {
        let path = self.shard_path(context);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;
        Ok(())
    }
}
