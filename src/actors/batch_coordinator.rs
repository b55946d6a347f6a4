//! # Batch Coordinator Actor
//!
//! One instance per batch identity. Drives the two-phase
//! validate/commit/execute/finish protocol: dry-run every command, durably
//! record `BatchStarted` once validation succeeds, dispatch every command for
//! real execution, collect every outcome without aborting on individual
//! failure, durably record `BatchFinished`, then self-terminate after a grace
//! period.
//!
//! ## Mailbox model
//!
//! The coordinator is a single sequential state machine. It selects over two
//! channels - control messages (execute requests, kill, shutdown timer) and
//! outcome deliveries from the forwarder - and processes one message at a
//! time, so `BatchState` needs no locking. "Awaiting outcomes" and "awaiting
//! the shutdown timer" are a change of which messages are acted on, not a
//! blocking wait.
//!
//! ## Crash recovery
//!
//! On recovery the journal is replayed through the same
//! [`BatchState::apply`] fold used live. A non-empty pending set means the
//! batch was committed but unfinished: the remaining commands are
//! re-dispatched as real executions and the dry run is never repeated,
//! because the existence of `BatchStarted` implies validation passed.

use crate::actors::CoordinationActor;
use crate::context::CoordinationContext;
use crate::correlation::{BatchId, InternalCorrelationId};
use crate::error::BatcherResult;
use crate::events::{BatchEvent, RecordedCommand};
use crate::forwarder::OutcomeSink;
use crate::journal::JournalEvent;
use crate::messages::{
    BatchCommand, CommandOutcome, DeliveredOutcome, ExecuteBatchResponse, ExecuteResponder,
};
use crate::state_machine::{BatchPhase, BatchState};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Control messages accepted by a coordinator.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// An execute-batch request routed here by the supervisor.
    Execute {
        commands: Vec<BatchCommand>,
        resp: ExecuteResponder,
    },
    /// Deliberate external kill: stop permanently, no restart.
    Kill,
    /// The self-shutdown grace period elapsed.
    ShutdownElapsed,
}

/// Why a coordinator instance stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Batch finished and the grace period elapsed.
    Finished,
    /// A dry-run validation failed; the batch never existed durably.
    ValidationAborted,
    /// Recovery found nothing left to do.
    Idle,
    /// Stopped by an external kill signal.
    Killed,
}

/// Cloneable handle for routing messages to one coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    batch_id: BatchId,
    tx: mpsc::Sender<CoordinatorMessage>,
}

impl CoordinatorHandle {
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    /// Route an execute-batch request to this coordinator.
    pub async fn execute(
        &self,
        commands: Vec<BatchCommand>,
        resp: ExecuteResponder,
    ) -> BatcherResult<()> {
        self.send(CoordinatorMessage::Execute { commands, resp })
            .await
    }

    /// Stop this coordinator permanently.
    pub async fn kill(&self) -> BatcherResult<()> {
        self.send(CoordinatorMessage::Kill).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, message: CoordinatorMessage) -> BatcherResult<()> {
        self.tx.send(message).await.map_err(|_| {
            crate::error::BatcherError::CoordinationError(format!(
                "Coordinator for batch {} is no longer running",
                self.batch_id
            ))
        })
    }
}

/// The per-batch coordination state machine.
pub struct BatchCoordinator {
    context: Arc<CoordinationContext>,
    state: BatchState,
    control_rx: mpsc::Receiver<CoordinatorMessage>,
    /// Kept so the shutdown timer task can message the mailbox.
    control_tx: mpsc::Sender<CoordinatorMessage>,
    outcome_rx: mpsc::Receiver<DeliveredOutcome>,
    outcome_sink: OutcomeSink,
    requester: Option<ExecuteResponder>,
    stop_reason: StopReason,
}

impl CoordinationActor for BatchCoordinator {
    fn name(&self) -> &'static str {
        "BatchCoordinator"
    }

    fn context(&self) -> &Arc<CoordinationContext> {
        &self.context
    }

    fn started(&mut self) -> BatcherResult<()> {
        info!(
            actor = %self.name(),
            batch_id = %self.state.batch_id,
            "Coordinator started"
        );
        Ok(())
    }

    fn stopped(&mut self) -> BatcherResult<()> {
        info!(
            actor = %self.name(),
            batch_id = %self.state.batch_id,
            reason = ?self.stop_reason,
            "Coordinator stopped"
        );
        Ok(())
    }
}

impl BatchCoordinator {
    /// Spawn a coordinator for `batch_id`.
    ///
    /// With `recover = true` the journal is replayed before any message is
    /// processed, and remaining committed commands are re-dispatched.
    pub fn spawn(
        batch_id: BatchId,
        context: Arc<CoordinationContext>,
        recover: bool,
    ) -> (CoordinatorHandle, JoinHandle<BatcherResult<StopReason>>) {
        let buffer = context.config.mailbox_buffer;
        let (control_tx, control_rx) = mpsc::channel(buffer);
        let (outcome_tx, outcome_rx) = mpsc::channel(buffer);

        let coordinator = Self {
            context,
            state: BatchState::new(batch_id.clone()),
            control_rx,
            control_tx: control_tx.clone(),
            outcome_rx,
            outcome_sink: OutcomeSink::new(outcome_tx),
            requester: None,
            stop_reason: StopReason::Finished,
        };

        let handle = CoordinatorHandle {
            batch_id,
            tx: control_tx,
        };
        let join = tokio::spawn(coordinator.run(recover));
        (handle, join)
    }

    async fn run(mut self, recover: bool) -> BatcherResult<StopReason> {
        self.started()?;

        if recover {
            self.recover().await?;
        }

        let reason = loop {
            tokio::select! {
                Some(delivered) = self.outcome_rx.recv() => {
                    self.handle_outcome(delivered).await?;
                }
                Some(message) = self.control_rx.recv() => {
                    if let Some(reason) = self.handle_control(message).await? {
                        break reason;
                    }
                }
                // Unreachable while self holds a sender for each channel,
                // but select! requires the arm.
                else => break StopReason::Idle,
            }
        };

        self.stop_reason = reason;
        if let Err(e) = self.stopped() {
            warn!(batch_id = %self.state.batch_id, error = %e, "Coordinator stop hook failed");
        }
        Ok(reason)
    }

    // =========================================================================
    // Control messages
    // =========================================================================

    async fn handle_control(
        &mut self,
        message: CoordinatorMessage,
    ) -> BatcherResult<Option<StopReason>> {
        match message {
            CoordinatorMessage::Execute { commands, resp } => {
                self.handle_execute(commands, resp).await?;
                Ok(None)
            }
            CoordinatorMessage::Kill => {
                warn!(
                    batch_id = %self.state.batch_id,
                    phase = %self.state.phase,
                    "Coordinator stopped by external kill signal"
                );
                Ok(Some(StopReason::Killed))
            }
            CoordinatorMessage::ShutdownElapsed => {
                if self.state.phase.is_terminal() {
                    Ok(Some(self.stop_reason))
                } else {
                    warn!(
                        batch_id = %self.state.batch_id,
                        phase = %self.state.phase,
                        "Spurious shutdown timer ignored"
                    );
                    Ok(None)
                }
            }
        }
    }

    async fn handle_execute(
        &mut self,
        commands: Vec<BatchCommand>,
        resp: ExecuteResponder,
    ) -> BatcherResult<()> {
        match self.state.phase {
            BatchPhase::AwaitingFirstRequest => {
                for command in commands {
                    let correlation = InternalCorrelationId::mint(
                        self.state.batch_id.clone(),
                        command.original_correlation_id.clone(),
                    );
                    self.state.pending.insert(correlation.clone());
                    self.state.commands.insert(correlation, command);
                }
                self.requester = Some(resp);
                self.state.phase = BatchPhase::ValidatingDryRun;

                info!(
                    batch_id = %self.state.batch_id,
                    commands = self.state.commands.len(),
                    "Dispatching dry-run validation for batch"
                );
                self.dispatch_pending(true).await?;

                // A batch with no commands has nothing to validate.
                if self.state.is_drained() {
                    self.commit().await?;
                    if self.state.is_drained() && self.state.phase.is_committed() {
                        self.finish().await?;
                    }
                }
                Ok(())
            }
            BatchPhase::ValidatingDryRun | BatchPhase::Committed => {
                info!(
                    batch_id = %self.state.batch_id,
                    phase = %self.state.phase,
                    "Duplicate execute-batch request rejected"
                );
                self.context.update_stats(|s| s.duplicate_submissions += 1);
                if resp
                    .send(ExecuteBatchResponse::AlreadyExecuting {
                        batch_id: self.state.batch_id.clone(),
                    })
                    .is_err()
                {
                    error!(
                        batch_id = %self.state.batch_id,
                        "Duplicate-rejection response channel closed - requester dropped"
                    );
                }
                Ok(())
            }
            BatchPhase::AwaitingShutdown => {
                // The request is dropped, not rejected: the requester never
                // receives a reply.
                warn!(
                    batch_id = %self.state.batch_id,
                    "Execute-batch request received while awaiting shutdown - dropped"
                );
                Ok(())
            }
        }
    }

    // =========================================================================
    // Outcome deliveries
    // =========================================================================

    async fn handle_outcome(&mut self, delivered: DeliveredOutcome) -> BatcherResult<()> {
        match self.state.phase {
            BatchPhase::ValidatingDryRun => self.handle_dry_run_outcome(delivered).await,
            BatchPhase::Committed => self.handle_committed_outcome(delivered).await,
            BatchPhase::AwaitingFirstRequest | BatchPhase::AwaitingShutdown => {
                warn!(
                    batch_id = %self.state.batch_id,
                    phase = %self.state.phase,
                    correlation = %delivered.correlation,
                    "Outcome received outside an awaiting phase - dropped"
                );
                Ok(())
            }
        }
    }

    async fn handle_dry_run_outcome(&mut self, delivered: DeliveredOutcome) -> BatcherResult<()> {
        if !self.state.pending.contains(&delivered.correlation) {
            warn!(
                batch_id = %self.state.batch_id,
                correlation = %delivered.correlation,
                "Unrecognized dry-run outcome - dropped"
            );
            return Ok(());
        }

        match delivered.outcome {
            CommandOutcome::Failure { code, message } => {
                // Abort immediately without waiting for sibling outcomes.
                // Nothing was persisted: the batch never existed durably.
                info!(
                    batch_id = %self.state.batch_id,
                    correlation = %delivered.correlation,
                    code = %code,
                    "Dry-run validation failed - aborting batch"
                );
                self.context.update_stats(|s| s.batches_rejected += 1);
                self.reply(ExecuteBatchResponse::Rejected {
                    batch_id: self.state.batch_id.clone(),
                    code,
                    message,
                });
                self.state.pending.clear();
                self.state.phase = BatchPhase::AwaitingShutdown;
                self.schedule_shutdown(StopReason::ValidationAborted);
                Ok(())
            }
            CommandOutcome::Success { .. } => {
                self.state.pending.remove(&delivered.correlation);
                if self.state.is_drained() {
                    self.commit().await?;
                    if self.state.is_drained() && self.state.phase.is_committed() {
                        self.finish().await?;
                    }
                }
                Ok(())
            }
        }
    }

    async fn handle_committed_outcome(&mut self, delivered: DeliveredOutcome) -> BatcherResult<()> {
        if !self.state.pending.contains(&delivered.correlation) {
            warn!(
                batch_id = %self.state.batch_id,
                correlation = %delivered.correlation,
                "Outcome for unknown or already-completed command - dropped"
            );
            return Ok(());
        }

        // An individual failure after commit is a normal outcome; it does not
        // abort sibling commands.
        let event = BatchEvent::BatchCommandCompleted {
            correlation: delivered.correlation,
            outcome: delivered.outcome,
            at: Utc::now(),
        };
        self.persist(event.clone()).await?;
        self.state.apply(&event);

        debug!(
            batch_id = %self.state.batch_id,
            remaining = self.state.pending.len(),
            "Command outcome recorded"
        );

        if self.state.is_drained() {
            self.finish().await?;
        }
        Ok(())
    }

    // =========================================================================
    // Phase transitions
    // =========================================================================

    /// Durable commit point: every dry run succeeded.
    async fn commit(&mut self) -> BatcherResult<()> {
        let recorded: Vec<RecordedCommand> = self
            .state
            .commands
            .iter()
            .map(|(correlation, command)| RecordedCommand {
                correlation: correlation.clone(),
                command: command.clone(),
            })
            .collect();

        let event = BatchEvent::BatchStarted {
            batch_id: self.state.batch_id.clone(),
            at: Utc::now(),
            commands: recorded,
        };
        self.persist(event.clone()).await?;
        self.state.apply(&event);

        info!(
            batch_id = %self.state.batch_id,
            commands = self.state.commands.len(),
            "Batch committed - dispatching real execution"
        );
        self.context.update_stats(|s| s.batches_accepted += 1);
        self.reply(ExecuteBatchResponse::Accepted {
            batch_id: self.state.batch_id.clone(),
        });

        self.dispatch_pending(false).await?;
        self.publish(event);
        Ok(())
    }

    /// Terminal marker: every real outcome has been collected.
    async fn finish(&mut self) -> BatcherResult<()> {
        let event = BatchEvent::BatchFinished {
            batch_id: self.state.batch_id.clone(),
            at: Utc::now(),
            collected_outcomes: self.state.collected_outcomes.clone(),
        };
        self.persist(event.clone()).await?;
        self.state.apply(&event);

        info!(
            batch_id = %self.state.batch_id,
            outcomes = self.state.collected_outcomes.len(),
            "Batch finished"
        );
        self.context.update_stats(|s| s.batches_completed += 1);
        self.publish(event);
        self.schedule_shutdown(StopReason::Finished);
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    async fn recover(&mut self) -> BatcherResult<()> {
        let entity_id = self.state.batch_id.as_str().to_string();
        let recovery = self.context.journal.replay(&entity_id).await?;

        let events: Vec<BatchEvent> = recovery
            .events
            .into_iter()
            .filter_map(|record| match record.event {
                JournalEvent::Batch(event) => Some(event),
                JournalEvent::Supervisor(_) => None,
            })
            .collect();

        if events.is_empty() {
            // Never got past validation before the crash; nothing durable
            // exists. Do not linger.
            info!(
                batch_id = %self.state.batch_id,
                "No durable events to recover - scheduling shutdown"
            );
            self.state.phase = BatchPhase::AwaitingShutdown;
            self.schedule_shutdown(StopReason::Idle);
            return Ok(());
        }

        self.state = BatchState::replay(self.state.batch_id.clone(), events.iter());

        if !self.state.is_drained() {
            // Committed but unfinished: re-dispatch the remaining commands as
            // real executions. The dry run is never repeated - BatchStarted
            // implies it succeeded.
            info!(
                batch_id = %self.state.batch_id,
                remaining = self.state.pending.len(),
                "Recovered committed batch - re-dispatching remaining commands"
            );
            self.context.update_stats(|s| s.coordinator_restarts += 1);
            self.dispatch_pending(false).await?;
        } else {
            info!(
                batch_id = %self.state.batch_id,
                phase = %self.state.phase,
                "Recovered batch with no pending commands - scheduling shutdown"
            );
            self.state.phase = BatchPhase::AwaitingShutdown;
            self.schedule_shutdown(StopReason::Idle);
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn dispatch_pending(&self, dry_run: bool) -> BatcherResult<()> {
        let dispatches: Vec<(InternalCorrelationId, BatchCommand)> = self
            .state
            .pending
            .iter()
            .filter_map(|correlation| {
                self.state
                    .commands
                    .get(correlation)
                    .map(|command| (correlation.clone(), command.clone()))
            })
            .collect();
        let count = dispatches.len() as u64;

        let futures = dispatches.into_iter().map(|(correlation, command)| {
            let forwarder = Arc::clone(&self.context.forwarder);
            let sink = self.outcome_sink.clone();
            async move { forwarder.dispatch(command, correlation, dry_run, sink).await }
        });
        futures::future::try_join_all(futures).await?;

        self.context.update_stats(|s| s.commands_dispatched += count);
        Ok(())
    }

    async fn persist(&self, event: BatchEvent) -> BatcherResult<()> {
        self.context
            .journal
            .append(self.state.batch_id.as_str(), JournalEvent::Batch(event))
            .await?;
        Ok(())
    }

    fn publish(&self, event: BatchEvent) {
        if let Err(e) = self.context.publisher.publish(event) {
            // Best-effort bus: never fatal.
            warn!(
                batch_id = %self.state.batch_id,
                error = %e,
                "Failed to publish lifecycle event"
            );
        }
    }

    fn reply(&mut self, response: ExecuteBatchResponse) {
        if let Some(resp) = self.requester.take() {
            if resp.send(response).is_err() {
                error!(
                    batch_id = %self.state.batch_id,
                    "Execute-batch response channel closed - requester dropped before reply"
                );
            }
        }
    }

    fn schedule_shutdown(&mut self, reason: StopReason) {
        self.stop_reason = reason;
        let grace = self.context.config.shutdown_grace;
        let tx = self.control_tx.clone();
        let batch_id = self.state.batch_id.clone();
        debug!(batch_id = %batch_id, grace_ms = grace.as_millis() as u64, "Self-shutdown scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // Send failure means the coordinator is already gone.
            let _ = tx.send(CoordinatorMessage::ShutdownElapsed).await;
        });
    }
}
