//! Command forwarder boundary.
//!
//! The forwarder is an external collaborator: it accepts a single command and
//! asynchronously produces exactly one outcome (success or failure) addressed
//! back by the internal correlation id of the dispatch. Delivery guarantees
//! for the underlying commands are the forwarder's responsibility, not this
//! core's.

use crate::correlation::InternalCorrelationId;
use crate::error::{BatcherError, BatcherResult};
use crate::messages::{BatchCommand, CommandOutcome, DeliveredOutcome};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Callback channel a coordinator hands to the forwarder with each dispatch.
///
/// Cheap to clone; one sink instance serves every dispatch of a batch.
#[derive(Debug, Clone)]
pub struct OutcomeSink {
    tx: mpsc::Sender<DeliveredOutcome>,
}

impl OutcomeSink {
    pub fn new(tx: mpsc::Sender<DeliveredOutcome>) -> Self {
        Self { tx }
    }

    /// Deliver the single outcome for a dispatch back to its coordinator.
    pub async fn deliver(
        &self,
        correlation: InternalCorrelationId,
        outcome: CommandOutcome,
    ) -> BatcherResult<()> {
        self.tx
            .send(DeliveredOutcome {
                correlation,
                outcome,
            })
            .await
            .map_err(|_| {
                BatcherError::CoordinationError(
                    "Outcome channel closed - coordinator stopped before delivery".to_string(),
                )
            })
    }
}

/// Dispatch interface to the command-processing fabric.
///
/// `dry_run = true` requests a validation-only execution that must not
/// produce durable side effects downstream. The forwarder must deliver
/// exactly one outcome per dispatch through the provided sink; the core
/// waits indefinitely for it.
#[async_trait]
pub trait CommandForwarder: Send + Sync {
    async fn dispatch(
        &self,
        command: BatchCommand,
        correlation: InternalCorrelationId,
        dry_run: bool,
        outcome_sink: OutcomeSink,
    ) -> BatcherResult<()>;
}
