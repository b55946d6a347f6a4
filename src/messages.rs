//! Message types crossing the coordination core's boundaries.
//!
//! Inbound: [`ExecuteBatchRequest`] answered by exactly one
//! [`ExecuteBatchResponse`] delivered through a oneshot responder.
//! Outbound traffic to the command forwarder is tagged with an
//! [`crate::correlation::InternalCorrelationId`] and comes back as a
//! [`DeliveredOutcome`].

use crate::correlation::{BatchId, InternalCorrelationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// An opaque, immutable unit of work submitted as part of a batch.
///
/// Owned by the coordinator from submission until the batch finishes. The
/// `original_correlation_id` is caller-supplied and used to match the final
/// outcome back to the originating command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCommand {
    pub original_correlation_id: String,
    pub payload: serde_json::Value,
}

impl BatchCommand {
    pub fn new(original_correlation_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            original_correlation_id: original_correlation_id.into(),
            payload,
        }
    }
}

/// Outcome of one command execution, success or failure.
///
/// A `Failure` observed after the batch is committed is a normal,
/// non-fatal outcome recorded alongside successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success { payload: serde_json::Value },
    Failure { code: String, message: String },
}

impl CommandOutcome {
    pub fn success(payload: serde_json::Value) -> Self {
        Self::Success { payload }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failure {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// An outcome as delivered by the command forwarder, tagged with the internal
/// correlation id of the dispatch it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredOutcome {
    pub correlation: InternalCorrelationId,
    pub outcome: CommandOutcome,
}

/// Metadata accompanying a batch submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub requester: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Inbound request: execute this command set as one logical unit.
///
/// `batch_id` is optional; the supervisor generates one when absent.
#[derive(Debug, Clone)]
pub struct ExecuteBatchRequest {
    pub batch_id: Option<BatchId>,
    pub commands: Vec<BatchCommand>,
    pub metadata: RequestMetadata,
}

impl ExecuteBatchRequest {
    pub fn new(batch_id: Option<BatchId>, commands: Vec<BatchCommand>) -> Self {
        Self {
            batch_id,
            commands,
            metadata: RequestMetadata::default(),
        }
    }
}

/// The single reply delivered to the original requester.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteBatchResponse {
    /// Every command's dry run succeeded; the batch is durably committed and
    /// real execution has been dispatched.
    Accepted { batch_id: BatchId },
    /// A dry-run validation failed; the batch never existed durably.
    Rejected {
        batch_id: BatchId,
        code: String,
        message: String,
    },
    /// A batch with this identity is already mid-flight.
    AlreadyExecuting { batch_id: BatchId },
}

/// Responder for the execute-batch reply (send exactly once).
pub type ExecuteResponder = oneshot::Sender<ExecuteBatchResponse>;
