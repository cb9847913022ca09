use crate::reporting::FailureReport;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StackshardError {
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already started: {0}")]
    IndexAlreadyExists(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Sharding strategy for index '{index}' did not provide any shard identifiers; \
         call disable_sharding() for an unsharded index"
    )]
    MissingShardIdentifiers { index: String },

    #[error("Unknown shard '{shard}' for index '{index}'")]
    UnknownShard { index: String, shard: String },

    #[error("Shard '{shard}' of index '{index}' failed to start and is unavailable")]
    ShardUnavailable { index: String, shard: String },

    #[error(
        "Tenant identifier '{tenant}' was provided, but multi-tenancy is disabled for {context}"
    )]
    UnexpectedTenantId { tenant: String, context: String },

    #[error("Multi-tenancy is enabled for {context}, but no tenant identifier was provided")]
    MissingTenantId { context: String },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Index schema mismatch for {context}: {message}")]
    SchemaMismatch { context: String, message: String },

    #[error("Failed to {work}: {cause}")]
    WorkFailed {
        work: String,
        cause: Box<StackshardError>,
    },

    #[error("Work was abandoned before completion: {0}")]
    WorkAbandoned(String),

    #[error("Orchestrator stopped: {0}")]
    OrchestratorStopped(String),

    #[error("Index accessor closed: {0}")]
    AccessorClosed(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Tantivy error: {0}")]
    Tantivy(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    StartupFailed(FailureReport),

    #[error("{0}")]
    Failures(FailureReport),

    #[error("{error} (suppressed while cleaning up: {})", render_suppressed(.suppressed))]
    Suppressed {
        error: Box<StackshardError>,
        suppressed: Vec<StackshardError>,
    },
}

pub type Result<T> = std::result::Result<T, StackshardError>;

fn render_suppressed(suppressed: &[StackshardError]) -> String {
    suppressed
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for StackshardError {
    fn from(e: std::io::Error) -> Self {
        StackshardError::Io(e.to_string())
    }
}

impl From<tantivy::TantivyError> for StackshardError {
    fn from(e: tantivy::TantivyError) -> Self {
        StackshardError::Tantivy(e.to_string())
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for StackshardError {
    fn from(e: tantivy::directory::error::OpenDirectoryError) -> Self {
        StackshardError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StackshardError {
    fn from(e: serde_json::Error) -> Self {
        StackshardError::Json(e.to_string())
    }
}

/// Which scope an error belongs to. Nothing in the crate retries on its own;
/// the category tells the caller who can act on the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad configuration, detected at load or start.
    Configuration,
    /// Caller misuse (tenancy mismatch, invalid document, unknown shard).
    Usage,
    /// One or more shards failed to start.
    Startup,
    /// A unit of work failed while executing against a shard.
    Execution,
    /// Engine or filesystem failure.
    Resource,
}

impl StackshardError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StackshardError::Config(_) => ErrorCategory::Configuration,
            StackshardError::MissingShardIdentifiers { .. } => ErrorCategory::Configuration,
            StackshardError::IndexNotFound(_) => ErrorCategory::Usage,
            StackshardError::IndexAlreadyExists(_) => ErrorCategory::Usage,
            StackshardError::UnknownShard { .. } => ErrorCategory::Usage,
            StackshardError::UnexpectedTenantId { .. } => ErrorCategory::Usage,
            StackshardError::MissingTenantId { .. } => ErrorCategory::Usage,
            StackshardError::InvalidDocument(_) => ErrorCategory::Usage,
            StackshardError::MissingField(_) => ErrorCategory::Usage,
            StackshardError::SchemaMismatch { .. } => ErrorCategory::Configuration,
            StackshardError::WorkFailed { .. } => ErrorCategory::Execution,
            StackshardError::WorkAbandoned(_) => ErrorCategory::Execution,
            StackshardError::OrchestratorStopped(_) => ErrorCategory::Execution,
            StackshardError::AccessorClosed(_) => ErrorCategory::Resource,
            StackshardError::Io(_) => ErrorCategory::Resource,
            StackshardError::Tantivy(_) => ErrorCategory::Resource,
            StackshardError::Json(_) => ErrorCategory::Usage,
            StackshardError::Internal(_) => ErrorCategory::Execution,
            StackshardError::StartupFailed(_) => ErrorCategory::Startup,
            StackshardError::Failures(_) => ErrorCategory::Execution,
            StackshardError::ShardUnavailable { .. } => ErrorCategory::Resource,
            StackshardError::Suppressed { error, .. } => error.category(),
        }
    }

    /// Errors attached while releasing resources after this error, if any.
    pub fn suppressed(&self) -> &[StackshardError] {
        match self {
            StackshardError::Suppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }

    /// The underlying error of a failed work, or `self`.
    pub fn root_cause(&self) -> &StackshardError {
        match self {
            StackshardError::WorkFailed { cause, .. } => cause.root_cause(),
            StackshardError::Suppressed { error, .. } => error.root_cause(),
            other => other,
        }
    }

    /// The error that triggered cleanup, with suppressed release errors peeled off.
    pub fn original(&self) -> &StackshardError {
        match self {
            StackshardError::Suppressed { error, .. } => error.original(),
            other => other,
        }
    }
}
