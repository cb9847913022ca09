//! Work paired with its completion handle.

use crate::error::{Result, StackshardError};
use crate::orchestration::WorkProcessor;
use crate::work::IndexingWork;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Sending half of a unit's completion. Resolves at most once; dropping it
/// unresolved resolves the handle with [`StackshardError::WorkAbandoned`].
#[derive(Debug)]
pub struct Completion {
    sender: Option<oneshot::Sender<Result<()>>>,
    description: String,
}

impl Completion {
    pub fn resolve(mut self, result: Result<()>) {
        if let Some(sender) = self.sender.take() {
            // The caller may have stopped waiting; the work still happened.
            let _ = sender.send(result);
        }
    }

    pub fn complete(self) {
        self.resolve(Ok(()))
    }

    pub fn fail(self, error: StackshardError) {
        self.resolve(Err(error))
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            tracing::warn!("{} was dropped before completion", self.description);
            let _ = sender.send(Err(StackshardError::WorkAbandoned(std::mem::take(
                &mut self.description,
            ))));
        }
    }
}

/// Resolves once the unit's batch has been executed and closed.
///
/// Dropping the handle, or abandoning it after a timeout, does not cancel
/// the work.
#[derive(Debug)]
pub struct WorkHandle {
    receiver: oneshot::Receiver<Result<()>>,
}

impl WorkHandle {
    /// A handle that is already resolved with `error`.
    pub fn failed(error: StackshardError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error));
        WorkHandle { receiver }
    }
}

impl Future for WorkHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(StackshardError::WorkAbandoned(
                "completion was dropped without a result".to_string(),
            )),
        })
    }
}

/// A single-use unit: one work and the completion resolving its handle.
#[derive(Debug)]
pub struct BatchedWork {
    work: IndexingWork,
    completion: Completion,
}

impl BatchedWork {
    pub fn new(work: IndexingWork) -> (Self, WorkHandle) {
        let (sender, receiver) = oneshot::channel();
        let completion = Completion {
            sender: Some(sender),
            description: work.description(),
        };
        (BatchedWork { work, completion }, WorkHandle { receiver })
    }

    pub fn work(&self) -> &IndexingWork {
        &self.work
    }

    pub fn into_parts(self) -> (IndexingWork, Completion) {
        (self.work, self.completion)
    }

    pub fn fail(self, error: StackshardError) {
        self.completion.fail(error)
    }

    /// Execute this unit alone as one batch and resolve its handle.
    pub fn submit_to(self, processor: &dyn WorkProcessor) {
        let (work, completion) = self.into_parts();
        let mut results = execute_batch(processor, std::slice::from_ref(&work));
        let result = results.pop().unwrap_or_else(|| {
            Err(StackshardError::WorkFailed {
                work: work.description(),
                cause: Box::new(StackshardError::Internal(
                    "processor returned no result".to_string(),
                )),
            })
        });
        completion.resolve(result);
    }
}

/// Run a batch, turning a batch-level failure or a panic into one error per work.
pub(crate) fn execute_batch(
    processor: &dyn WorkProcessor,
    works: &[IndexingWork],
) -> Vec<Result<()>> {
    let outcome =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| processor.execute(works)));
    let batch_error = match outcome {
        Ok(Ok(results)) if results.len() == works.len() => return results,
        Ok(Ok(results)) => StackshardError::Internal(format!(
            "processor returned {} results for {} works",
            results.len(),
            works.len()
        )),
        Ok(Err(e)) => e,
        Err(_) => StackshardError::Internal("processor panicked".to_string()),
    };
    works
        .iter()
        .map(|work| {
            Err(StackshardError::WorkFailed {
                work: work.description(),
                cause: Box::new(batch_error.clone()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::EventContext;
    use crate::types::Document;
    use crate::work::WorkOperation;

    fn work(id: &str) -> IndexingWork {
        IndexingWork::new(
            WorkOperation::Add(Document::new(id)),
            EventContext::shard("products", Some("0")),
        )
    }

    struct FixedProcessor(fn(&[IndexingWork]) -> Result<Vec<Result<()>>>);

    impl WorkProcessor for FixedProcessor {
        fn execute(&self, works: &[IndexingWork]) -> Result<Vec<Result<()>>> {
            (self.0)(works)
        }
    }

    #[tokio::test]
    async fn handle_resolves_with_the_processor_result() {
        let (unit, handle) = BatchedWork::new(work("1"));
        unit.submit_to(&FixedProcessor(|works| Ok(works.iter().map(|_| Ok(())).collect())));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_an_unresolved_unit_abandons_it() {
        let (unit, handle) = BatchedWork::new(work("1"));
        drop(unit);
        let err = handle.await.unwrap_err();
        assert!(matches!(err, StackshardError::WorkAbandoned(ref d) if d.contains("'1'")));
    }

    #[tokio::test]
    async fn batch_failure_fails_every_work() {
        let works = vec![work("1"), work("2")];
        let results = execute_batch(
            &FixedProcessor(|_| Err(StackshardError::Tantivy("disk full".into()))),
            &works,
        );
        assert_eq!(results.len(), 2);
        for (result, id) in results.iter().zip(["'1'", "'2'"]) {
            let msg = result.as_ref().unwrap_err().to_string();
            assert!(msg.contains(id));
            assert!(msg.contains("disk full"));
        }
    }

    #[tokio::test]
    async fn panicking_processor_fails_the_unit_once() {
        let (unit, handle) = BatchedWork::new(work("1"));
        unit.submit_to(&FixedProcessor(|_| panic!("boom")));
        let err = handle.await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn resolving_after_the_caller_left_is_harmless() {
        let (unit, handle) = BatchedWork::new(work("1"));
        drop(handle);
        let (_, completion) = unit.into_parts();
        completion.complete();
    }

    #[tokio::test]
    async fn failed_handle_is_ready() {
        let err = WorkHandle::failed(StackshardError::OrchestratorStopped("products[0]".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StackshardError::OrchestratorStopped(_)));
    }
}
