//! Per-shard write queue.
//!
//! Units are queued in submission order and drained in batches by one task
//! at a time on the shared pool. The `processing` flag is the shard's
//! mutual exclusion: whoever flips it from false to true owns the drain
//! until it flips it back.
//!
//! The queue is unbounded. `submit` never blocks or rejects for capacity;
//! callers that need a ceiling on queued work enforce it before submitting.

use crate::config::IndexingQueueConfig;
use crate::error::{Result, StackshardError};
use crate::orchestration::batched::execute_batch;
use crate::orchestration::{BackendThreads, BatchedWork, Completion, WorkProcessor};
use crate::work::IndexingWork;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct SerialOrchestrator {
    inner: Arc<SerialInner>,
}

struct SerialInner {
    name: String,
    threads: BackendThreads,
    processor: Arc<dyn WorkProcessor>,
    max_batch_size: usize,
    batch_window: Duration,
    queue: Mutex<VecDeque<BatchedWork>>,
    /// Only changed while holding `queue`.
    accepting: AtomicBool,
    processing: AtomicBool,
    idle: Notify,
    batches: AtomicU64,
}

impl std::fmt::Debug for SerialOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialOrchestrator")
            .field("name", &self.inner.name)
            .field("queued", &self.queued())
            .field("processing", &self.inner.processing.load(Ordering::SeqCst))
            .finish()
    }
}

impl SerialOrchestrator {
    pub fn start(
        name: impl Into<String>,
        threads: BackendThreads,
        processor: Arc<dyn WorkProcessor>,
        config: &IndexingQueueConfig,
    ) -> Result<Self> {
        let name = name.into();
        if config.max_batch_size == 0 {
            return Err(StackshardError::Config(format!(
                "[SQ {}] max_batch_size must be positive",
                name
            )));
        }
        tracing::info!(
            "[SQ {}] started, max_batch_size={}, batch_window={}ms",
            name,
            config.max_batch_size,
            config.batch_window_ms
        );
        Ok(SerialOrchestrator {
            inner: Arc::new(SerialInner {
                name,
                threads,
                processor,
                max_batch_size: config.max_batch_size,
                batch_window: Duration::from_millis(config.batch_window_ms),
                queue: Mutex::new(VecDeque::new()),
                accepting: AtomicBool::new(true),
                processing: AtomicBool::new(false),
                idle: Notify::new(),
                batches: AtomicU64::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue a unit. Never blocks; after [`stop`](Self::stop) the unit is
    /// failed immediately with [`StackshardError::OrchestratorStopped`].
    pub fn submit(&self, unit: BatchedWork) {
        {
            let mut queue = self.inner.lock_queue();
            if !self.inner.accepting.load(Ordering::SeqCst) {
                drop(queue);
                unit.fail(StackshardError::OrchestratorStopped(self.inner.name.clone()));
                return;
            }
            queue.push_back(unit);
        }
        SerialInner::ensure_processing(&self.inner);
    }

    pub fn queued(&self) -> usize {
        self.inner.lock_queue().len()
    }

    /// Number of batches executed so far.
    pub fn batches_executed(&self) -> u64 {
        self.inner.batches.load(Ordering::SeqCst)
    }

    /// Stop accepting units, then wait until every queued unit has run.
    pub async fn stop(&self) {
        {
            let _queue = self.inner.lock_queue();
            self.inner.accepting.store(false, Ordering::SeqCst);
        }
        tracing::info!("[SQ {}] stopping, draining {} queued", self.inner.name, self.queued());
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                break;
            }
            notified.await;
        }
        tracing::info!("[SQ {}] stopped", self.inner.name);
    }
}

impl SerialInner {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<BatchedWork>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        !self.processing.load(Ordering::SeqCst) && self.lock_queue().is_empty()
    }

    fn ensure_processing(this: &Arc<Self>) {
        if this
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let me = this.clone();
            this.threads.spawn(move || SerialInner::drain(me));
        }
    }

    /// Runs one batch, then either hands the drain to a fresh pool task
    /// (more work queued) or releases the flag.
    fn drain(this: Arc<Self>) {
        let batch = this.take_batch();
        if !batch.is_empty() {
            this.run_batch(batch);
        }

        if !this.lock_queue().is_empty() {
            let me = this.clone();
            this.threads.spawn(move || SerialInner::drain(me));
            return;
        }
        this.processing.store(false, Ordering::SeqCst);
        if this.lock_queue().is_empty() {
            tracing::trace!("[SQ {}] idle", this.name);
            this.idle.notify_waiters();
        } else {
            SerialInner::ensure_processing(&this);
        }
    }

    fn take_batch(&self) -> Vec<BatchedWork> {
        let mut batch = Vec::new();
        self.fill(&mut batch);
        if !batch.is_empty() && batch.len() < self.max_batch_size && !self.batch_window.is_zero()
        {
            std::thread::sleep(self.batch_window);
            self.fill(&mut batch);
        }
        batch
    }

    fn fill(&self, batch: &mut Vec<BatchedWork>) {
        let mut queue = self.lock_queue();
        let take = (self.max_batch_size - batch.len()).min(queue.len());
        batch.extend(queue.drain(..take));
    }

    fn run_batch(&self, batch: Vec<BatchedWork>) {
        let size = batch.len();
        tracing::debug!("[SQ {}] executing batch of {} work(s)", self.name, size);
        let (works, completions): (Vec<IndexingWork>, Vec<Completion>) =
            batch.into_iter().map(BatchedWork::into_parts).unzip();

        let results = execute_batch(self.processor.as_ref(), &works);
        let mut failed = 0;
        for (completion, result) in completions.into_iter().zip(results) {
            if result.is_err() {
                failed += 1;
            }
            completion.resolve(result);
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        if failed > 0 {
            tracing::warn!(
                "[SQ {}] batch of {} finished with {} failure(s)",
                self.name,
                size,
                failed
            );
        }
    }
}
