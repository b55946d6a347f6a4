//! In-memory state for one batch, and the fold that rebuilds it from
//! durable events.
//!
//! [`BatchState::apply`] is the single transition function for durable
//! events. The live path appends an event and then applies it; replay applies
//! the same events in persisted order. State reached by replay is therefore
//! identical to state reached live.

use crate::correlation::{BatchId, InternalCorrelationId};
use crate::events::BatchEvent;
use crate::messages::{BatchCommand, CommandOutcome};
use crate::state_machine::BatchPhase;
use std::collections::{HashMap, HashSet};

/// State owned exclusively by one coordinator instance; never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchState {
    pub batch_id: BatchId,
    pub phase: BatchPhase,
    /// The full command set, keyed by internal correlation id. Populated at
    /// submission and made durable by `BatchStarted`.
    pub commands: HashMap<InternalCorrelationId, BatchCommand>,
    /// Commands whose outcome has not yet been observed in the current phase.
    pub pending: HashSet<InternalCorrelationId>,
    /// Outcomes accumulated during the commit phase, keyed by the original
    /// correlation id, in arrival order.
    pub collected_outcomes: Vec<(String, CommandOutcome)>,
}

impl BatchState {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            phase: BatchPhase::AwaitingFirstRequest,
            commands: HashMap::new(),
            pending: HashSet::new(),
            collected_outcomes: Vec::new(),
        }
    }

    /// Apply one durable event.
    ///
    /// Pure with respect to its inputs: no I/O, no clock reads. Used by the
    /// live path immediately after a successful append and by replay.
    pub fn apply(&mut self, event: &BatchEvent) {
        match event {
            BatchEvent::BatchStarted {
                batch_id, commands, ..
            } => {
                self.batch_id = batch_id.clone();
                self.commands = commands
                    .iter()
                    .map(|rc| (rc.correlation.clone(), rc.command.clone()))
                    .collect();
                self.pending = self.commands.keys().cloned().collect();
                self.collected_outcomes.clear();
                self.phase = BatchPhase::Committed;
            }
            BatchEvent::BatchCommandCompleted {
                correlation,
                outcome,
                ..
            } => {
                self.pending.remove(correlation);
                // The internal id is reversible, so the outcome is recorded
                // under the original correlation id on replay exactly as on
                // the live path.
                self.collected_outcomes
                    .push((correlation.original().to_string(), outcome.clone()));
            }
            BatchEvent::BatchFinished { .. } => {
                self.phase = BatchPhase::AwaitingShutdown;
            }
        }
    }

    /// Rebuild state for a batch by folding its persisted events in order.
    pub fn replay<'a>(
        batch_id: BatchId,
        events: impl IntoIterator<Item = &'a BatchEvent>,
    ) -> Self {
        let mut state = Self::new(batch_id);
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Whether every outstanding outcome for the current phase has arrived.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}
