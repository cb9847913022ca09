//! Failure collection for multi-shard operations.
//!
//! Startup of a sharded index must try every shard even when one of them
//! fails, and cleanup after a failed acquisition must not hide the error that
//! triggered it. [`FailureCollector`] accumulates `(context, error)` pairs into
//! one [`FailureReport`], raised as [`StackshardError::StartupFailed`] by
//! startup and as [`StackshardError::Failures`] by any other operation. [`SuppressingCloser`]
//! runs release steps and attaches their errors to the original one.

use crate::error::{Result, StackshardError};
use serde::Serialize;
use std::fmt;

/// Where an event happened: an index, optionally narrowed to one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EventContext {
    pub index: String,
    pub shard: Option<String>,
}

impl EventContext {
    pub fn index(index: impl Into<String>) -> Self {
        EventContext {
            index: index.into(),
            shard: None,
        }
    }

    pub fn shard(index: impl Into<String>, shard: Option<&str>) -> Self {
        EventContext {
            index: index.into(),
            shard: shard.map(str::to_string),
        }
    }

    /// Compact form used as a log prefix and as the management queuing key.
    pub fn resource_name(&self) -> String {
        match &self.shard {
            Some(shard) => format!("{}[{}]", self.index, shard),
            None => self.index.clone(),
        }
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shard {
            Some(shard) => write!(f, "index '{}', shard '{}'", self.index, shard),
            None => write!(f, "index '{}'", self.index),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextualFailure {
    pub context: EventContext,
    pub error: StackshardError,
}

/// Every failure collected while running one operation over several shards.
#[derive(Debug, Clone)]
pub struct FailureReport {
    /// What was attempted, e.g. `"Startup"` or `"Schema validation"`.
    pub operation: String,
    pub index: String,
    pub failures: Vec<ContextualFailure>,
}

impl FailureReport {
    /// Shard identifiers that failed, in the order they were attempted.
    pub fn failed_shards(&self) -> Vec<Option<String>> {
        self.failures
            .iter()
            .map(|f| f.context.shard.clone())
            .collect()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of index '{}' failed with {} failure(s):",
            self.operation,
            self.index,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.context, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<ContextualFailure>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, context: EventContext, error: StackshardError) {
        tracing::error!("{}: {}", context, error);
        self.failures.push(ContextualFailure { context, error });
    }

    pub fn into_report(self, operation: &str, index: &str) -> Option<FailureReport> {
        if self.failures.is_empty() {
            return None;
        }
        Some(FailureReport {
            operation: operation.to_string(),
            index: index.to_string(),
            failures: self.failures,
        })
    }

    /// `Ok(())` when nothing was collected, one aggregate error otherwise.
    /// Startup builds its [`StackshardError::StartupFailed`] from
    /// [`into_report`](Self::into_report) instead.
    pub fn into_result_for(self, operation: &str, index: &str) -> Result<()> {
        match self.into_report(operation, index) {
            None => Ok(()),
            Some(report) => Err(StackshardError::Failures(report)),
        }
    }
}

/// Releases resources after a failure, recording release errors as suppressed.
///
/// ```
/// use stackshard::reporting::SuppressingCloser;
/// use stackshard::StackshardError;
///
/// let err = SuppressingCloser::new(StackshardError::Tantivy("lock busy".into()))
///     .push(|| Err(StackshardError::Io("close failed".into())))
///     .into_error();
/// assert_eq!(err.suppressed().len(), 1);
/// ```
pub struct SuppressingCloser {
    original: StackshardError,
    suppressed: Vec<StackshardError>,
}

impl SuppressingCloser {
    pub fn new(original: StackshardError) -> Self {
        SuppressingCloser {
            original,
            suppressed: Vec::new(),
        }
    }

    pub fn push<F>(mut self, close: F) -> Self
    where
        F: FnOnce() -> Result<()>,
    {
        if let Err(e) = close() {
            tracing::warn!("suppressed error while releasing resources: {}", e);
            self.suppressed.push(e);
        }
        self
    }

    pub fn into_error(self) -> StackshardError {
        if self.suppressed.is_empty() {
            self.original
        } else {
            StackshardError::Suppressed {
                error: Box::new(self.original),
                suppressed: self.suppressed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collector_is_ok() {
        assert!(FailureCollector::new()
            .into_report("Startup", "products")
            .is_none());
        assert!(FailureCollector::new()
            .into_result_for("Flush", "products")
            .is_ok());
    }

    #[test]
    fn collector_keeps_every_failure_in_order() {
        let mut collector = FailureCollector::new();
        collector.add(
            EventContext::shard("products", Some("0")),
            StackshardError::Io("a".into()),
        );
        collector.add(
            EventContext::shard("products", Some("2")),
            StackshardError::Io("b".into()),
        );
        match collector.into_report("Startup", "products") {
            Some(report) => {
                assert_eq!(report.index, "products");
                assert_eq!(
                    report.failed_shards(),
                    vec![Some("0".to_string()), Some("2".to_string())]
                );
                let text = report.to_string();
                assert!(text.contains("2 failure(s)"));
                assert!(text.contains("index 'products', shard '0': IO error: a"));
            }
            None => panic!("expected a report"),
        }
    }

    #[test]
    fn non_startup_operations_use_their_own_name() {
        let mut collector = FailureCollector::new();
        collector.add(
            EventContext::shard("products", Some("1")),
            StackshardError::SchemaMismatch {
                context: "index 'products', shard '1'".into(),
                message: "index does not exist".into(),
            },
        );
        let err = collector
            .into_result_for("Schema validation", "products")
            .unwrap_err();
        assert!(matches!(err, StackshardError::Failures(_)));
        assert!(err
            .to_string()
            .starts_with("Schema validation of index 'products' failed with 1 failure(s)"));
    }

    #[test]
    fn closer_without_release_errors_returns_original() {
        let err = SuppressingCloser::new(StackshardError::Config("x".into()))
            .push(|| Ok(()))
            .into_error();
        assert!(matches!(err, StackshardError::Config(_)));
    }

    #[test]
    fn closer_runs_every_step_and_keeps_original_first() {
        let mut ran = Vec::new();
        let err = SuppressingCloser::new(StackshardError::Tantivy("open failed".into()))
            .push(|| {
                ran.push(1);
                Err(StackshardError::Io("first".into()))
            })
            .push(|| {
                ran.push(2);
                Err(StackshardError::Io("second".into()))
            })
            .into_error();
        assert_eq!(ran, vec![1, 2]);
        assert!(matches!(err.original(), StackshardError::Tantivy(_)));
        assert_eq!(err.suppressed().len(), 2);
    }

    #[test]
    fn event_context_rendering() {
        let ctx = EventContext::shard("products", Some("3"));
        assert_eq!(ctx.to_string(), "index 'products', shard '3'");
        assert_eq!(ctx.resource_name(), "products[3]");
        let ctx = EventContext::shard("products", None);
        assert_eq!(ctx.to_string(), "index 'products'");
        assert_eq!(ctx.resource_name(), "products");
    }
}
