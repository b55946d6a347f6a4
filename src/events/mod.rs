//! Durable and lifecycle event types.
//!
//! These are the exact shapes appended to the entity journal and published on
//! the event bus. Replaying a batch's events through
//! [`crate::state_machine::BatchState::apply`] reconstructs its state.

pub mod publisher;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};

use crate::correlation::{BatchId, InternalCorrelationId};
use crate::messages::{BatchCommand, CommandOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A command as recorded at the durable commit point, with the internal
/// correlation id its dispatches carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCommand {
    pub correlation: InternalCorrelationId,
    pub command: BatchCommand,
}

/// Append-only events for one batch entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Written once, exactly when the dry-run phase succeeds for every
    /// command. Its existence implies validation passed; the dry run is
    /// never repeated after a crash.
    BatchStarted {
        batch_id: BatchId,
        at: DateTime<Utc>,
        commands: Vec<RecordedCommand>,
    },
    /// Written once per command during the commit phase, success or failure.
    BatchCommandCompleted {
        correlation: InternalCorrelationId,
        outcome: CommandOutcome,
        at: DateTime<Utc>,
    },
    /// Terminal marker with the full collected outcome list, keyed by the
    /// original correlation ids.
    BatchFinished {
        batch_id: BatchId,
        at: DateTime<Utc>,
        collected_outcomes: Vec<(String, CommandOutcome)>,
    },
}

impl BatchEvent {
    /// The batch this event belongs to, where the event carries it directly.
    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            BatchEvent::BatchStarted { batch_id, .. }
            | BatchEvent::BatchFinished { batch_id, .. } => Some(batch_id),
            BatchEvent::BatchCommandCompleted { correlation, .. } => Some(&correlation.batch_id),
        }
    }
}

/// Compacted mirror events for the supervisor's own entity.
///
/// Applying either event is idempotent: adding an already-present identity or
/// removing an already-absent one is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    BatchStartedSeen { batch_id: BatchId },
    BatchFinishedSeen { batch_id: BatchId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_event_serde_roundtrip() {
        let event = BatchEvent::BatchFinished {
            batch_id: BatchId::new("B1"),
            at: Utc::now(),
            collected_outcomes: vec![(
                "orig-1".to_string(),
                CommandOutcome::failure("E1", "downstream refused"),
            )],
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: BatchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_batch_id_extraction_from_completion() {
        let correlation = InternalCorrelationId::mint(BatchId::new("B7"), "orig");
        let event = BatchEvent::BatchCommandCompleted {
            correlation,
            outcome: CommandOutcome::success(serde_json::json!(null)),
            at: Utc::now(),
        };
        assert_eq!(event.batch_id().unwrap().as_str(), "B7");
    }
}
