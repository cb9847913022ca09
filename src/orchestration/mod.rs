//! Scheduling of work onto shards.
//!
//! Every shard has a [`SerialOrchestrator`] for document writes (FIFO,
//! batched, one batch in flight) and a [`ParallelOrchestrator`] for
//! management work and single-document indexing (concurrent, serialized per
//! queuing key). Both run their batches on the backend's shared
//! [`BackendThreads`] pool; no shard owns a thread.

pub mod batched;
pub mod parallel;
pub mod serial;
pub mod threads;

pub use batched::{BatchedWork, Completion, WorkHandle};
pub use parallel::ParallelOrchestrator;
pub use serial::SerialOrchestrator;
pub use threads::BackendThreads;

use crate::error::Result;
use crate::work::IndexingWork;

/// Executes works against one shard.
pub trait WorkProcessor: Send + Sync + 'static {
    /// Run `works` in order as one batch.
    ///
    /// Returns one result per work, in the same order. `Err` means the batch
    /// as a whole failed when it was closed (commit or refresh); every work
    /// of the batch is then considered failed with that error.
    fn execute(&self, works: &[IndexingWork]) -> Result<Vec<Result<()>>>;
}
