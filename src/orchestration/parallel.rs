//! Keyed concurrent execution.
//!
//! Units with distinct queuing keys run concurrently, bounded by the shared
//! pool. A unit whose key is already in flight waits behind it in that key's
//! queue and starts only once the earlier unit has resolved.

use crate::error::StackshardError;
use crate::orchestration::{BackendThreads, BatchedWork, WorkProcessor};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct ParallelOrchestrator {
    inner: Arc<ParallelInner>,
}

struct ParallelInner {
    name: String,
    threads: BackendThreads,
    processor: Arc<dyn WorkProcessor>,
    /// Keys with a unit executing, and the units waiting behind it.
    in_flight: DashMap<String, VecDeque<BatchedWork>>,
    accepting: AtomicBool,
    outstanding: AtomicUsize,
    idle: Notify,
}

impl std::fmt::Debug for ParallelOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelOrchestrator")
            .field("name", &self.inner.name)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl ParallelOrchestrator {
    pub fn start(
        name: impl Into<String>,
        threads: BackendThreads,
        processor: Arc<dyn WorkProcessor>,
    ) -> Self {
        let name = name.into();
        tracing::info!("[PQ {}] started", name);
        ParallelOrchestrator {
            inner: Arc::new(ParallelInner {
                name,
                threads,
                processor,
                in_flight: DashMap::new(),
                accepting: AtomicBool::new(true),
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Units submitted and not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    pub fn submit(&self, unit: BatchedWork) {
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        if !self.inner.accepting.load(Ordering::SeqCst) {
            unit.fail(StackshardError::OrchestratorStopped(self.inner.name.clone()));
            self.inner.finish_one();
            return;
        }

        let key = unit.work().queuing_key();
        match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(mut waiting) => {
                tracing::debug!("[PQ {}] key '{}' busy, queuing behind it", self.inner.name, key);
                waiting.get_mut().push_back(unit);
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::new());
                ParallelInner::run(&self.inner, key, unit);
            }
        }
    }

    /// Stop accepting units, then wait until every submitted unit has resolved.
    pub async fn stop(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        tracing::info!(
            "[PQ {}] stopping, {} outstanding",
            self.inner.name,
            self.outstanding()
        );
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                break;
            }
            notified.await;
        }
        tracing::info!("[PQ {}] stopped", self.inner.name);
    }
}

impl ParallelInner {
    fn run(this: &Arc<Self>, key: String, unit: BatchedWork) {
        let me = this.clone();
        this.threads.spawn(move || {
            unit.submit_to(me.processor.as_ref());
            me.finish_one();
            ParallelInner::next(&me, key);
        });
    }

    /// Start the next unit waiting on `key`, or release the key.
    fn next(this: &Arc<Self>, key: String) {
        let next = match this.in_flight.entry(key.clone()) {
            Entry::Occupied(mut waiting) => match waiting.get_mut().pop_front() {
                Some(unit) => Some(unit),
                None => {
                    waiting.remove();
                    None
                }
            },
            Entry::Vacant(_) => None,
        };
        if let Some(unit) = next {
            ParallelInner::run(this, key, unit);
        }
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}
