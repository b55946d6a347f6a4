//! Error types for the batch coordination core.

use thiserror::Error;

/// Error taxonomy for batch coordination.
///
/// Caller-visible failures (validation failures, duplicate submissions) are
/// never surfaced through this type - they are explicit response variants on
/// [`crate::messages::ExecuteBatchResponse`]. `BatcherError` covers internal
/// component failures, which propagate to the supervision policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatcherError {
    #[error("Coordination error: {0}")]
    CoordinationError(String),
    #[error("Correlation error: {0}")]
    CorrelationError(String),
    #[error("Journal error: {0}")]
    JournalError(String),
    #[error("Event error: {0}")]
    EventError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl BatcherError {
    /// Whether the supervision policy should restart the failed coordinator.
    ///
    /// Transient faults trigger an automatic restart of that one instance;
    /// everything else is escalated rather than silently retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, BatcherError::Transient(_))
    }
}

impl From<serde_json::Error> for BatcherError {
    fn from(error: serde_json::Error) -> Self {
        BatcherError::JournalError(format!("JSON serialization error: {error}"))
    }
}

pub type BatcherResult<T> = anyhow::Result<T, BatcherError>;
