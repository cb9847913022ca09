use crate::error::{Result, StackshardError};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// The shared pool every orchestrator of a backend runs its batches on.
///
/// Tasks run on tokio's blocking threads, at most `size` at a time; tantivy
/// writes block, so they never run on the async workers.
#[derive(Debug, Clone)]
pub struct BackendThreads {
    runtime: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl BackendThreads {
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(StackshardError::Config(
                "thread pool size must be positive".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|e| {
            StackshardError::Config(format!("backend threads need a tokio runtime: {}", e))
        })?;
        tracing::info!("Backend thread pool started with {} threads", size);
        Ok(BackendThreads {
            runtime,
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `task` on the pool once a thread is free. Never blocks the caller.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::warn!("backend thread pool closed, dropping task");
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::error!("backend task failed: {}", e);
            }
        });
    }
}
