//! # Batch Supervisor Actor
//!
//! Process-wide routing entry point. Accepts execute-batch requests and
//! routes each to the coordinator for its batch identity, creating that
//! instance on first reference; tracks the population of live coordinators;
//! and maintains a compacted durable record of which batch identities are
//! currently active so a crash can be recovered from.
//!
//! ## Active-set maintenance
//!
//! The supervisor is the sole writer of `active_batch_identities`. It learns
//! of `BatchStarted`/`BatchFinished` milestones from the event-bus
//! subscription - which also covers coordinators living on another node of
//! the same logical service - and, for local coordinators, from their exit
//! outcomes directly, since the bus may lag. Both observations are mirrored
//! into its own journal entity.
//! Both the live path and replay are idempotent: adding a present identity or
//! removing an absent one is a no-op. Once appended entries since the last
//! snapshot exceed the configured threshold, the active set is snapshotted
//! and the log truncated up to the snapshotted point.
//!
//! ## Supervision policy
//!
//! A coordinator that fails with a transient fault is restarted in recovery
//! mode; a deliberate kill stops it permanently; any other fault is escalated
//! loudly rather than silently retried.

use crate::actors::batch_coordinator::{BatchCoordinator, CoordinatorHandle, StopReason};
use crate::actors::CoordinationActor;
use crate::context::{CoordinationContext, CoordinationStats};
use crate::correlation::BatchId;
use crate::error::{BatcherError, BatcherResult};
use crate::events::{BatchEvent, PublishedEvent, SupervisorEvent};
use crate::journal::JournalEvent;
use crate::messages::{ExecuteBatchRequest, ExecuteBatchResponse, ExecuteResponder};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Journal entity identity for the supervisor's own compacted log.
pub const SUPERVISOR_ENTITY: &str = "batch-supervisor";

/// Messages processed by the supervisor's sequential loop.
#[derive(Debug)]
enum SupervisorMessage {
    Execute {
        batch_id: BatchId,
        request: ExecuteBatchRequest,
        resp: ExecuteResponder,
    },
    KillBatch {
        batch_id: BatchId,
    },
    BusEvent(PublishedEvent),
    CoordinatorExited {
        batch_id: BatchId,
        outcome: BatcherResult<StopReason>,
    },
    ActiveBatches {
        resp: oneshot::Sender<BTreeSet<BatchId>>,
    },
    Escalations {
        resp: oneshot::Sender<Vec<(BatchId, BatcherError)>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Cloneable public handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorMessage>,
    routing: Arc<DashMap<BatchId, CoordinatorHandle>>,
    context: Arc<CoordinationContext>,
}

impl SupervisorHandle {
    /// Submit a batch for coordinated execution.
    ///
    /// Returns the (possibly generated) batch identity and a receiver for the
    /// single accept/reject/duplicate reply. The reply arrives once the
    /// dry-run phase settles, not at submission time.
    pub async fn execute_batch(
        &self,
        request: ExecuteBatchRequest,
    ) -> BatcherResult<(BatchId, oneshot::Receiver<ExecuteBatchResponse>)> {
        let batch_id = request
            .batch_id
            .clone()
            .unwrap_or_else(BatchId::generate);
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(SupervisorMessage::Execute {
            batch_id: batch_id.clone(),
            request,
            resp: resp_tx,
        })
        .await?;
        Ok((batch_id, resp_rx))
    }

    /// Deliberately stop one coordinator, permanently.
    pub async fn kill_batch(&self, batch_id: BatchId) -> BatcherResult<()> {
        self.send(SupervisorMessage::KillBatch { batch_id }).await
    }

    /// The identities the supervisor currently considers active (durable
    /// view, survives restarts).
    pub async fn active_batches(&self) -> BatcherResult<BTreeSet<BatchId>> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorMessage::ActiveBatches { resp: tx })
            .await?;
        rx.await
            .map_err(|_| BatcherError::CoordinationError("Supervisor stopped".to_string()))
    }

    /// Faults that were escalated rather than retried.
    pub async fn escalations(&self) -> BatcherResult<Vec<(BatchId, BatcherError)>> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorMessage::Escalations { resp: tx })
            .await?;
        rx.await
            .map_err(|_| BatcherError::CoordinationError("Supervisor stopped".to_string()))
    }

    /// Number of coordinator instances currently in the routing table.
    pub fn live_coordinators(&self) -> usize {
        self.routing.len()
    }

    /// Whether a coordinator instance is currently routed for this identity.
    pub fn is_routed(&self, batch_id: &BatchId) -> bool {
        self.routing.contains_key(batch_id)
    }

    /// Snapshot of the shared processing counters.
    pub fn stats(&self) -> CoordinationStats {
        self.context.stats_snapshot()
    }

    /// Stop the supervisor, killing all live coordinators.
    pub async fn shutdown(&self) -> BatcherResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorMessage::Shutdown { resp: tx }).await?;
        rx.await
            .map_err(|_| BatcherError::CoordinationError("Supervisor stopped".to_string()))
    }

    async fn send(&self, message: SupervisorMessage) -> BatcherResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BatcherError::CoordinationError("Supervisor is not running".to_string()))
    }
}

/// The process-wide batch supervisor.
pub struct BatchSupervisor {
    context: Arc<CoordinationContext>,
    mailbox: mpsc::Receiver<SupervisorMessage>,
    /// Handle kept so monitor and listener tasks can message the mailbox.
    mailbox_tx: mpsc::Sender<SupervisorMessage>,
    routing: Arc<DashMap<BatchId, CoordinatorHandle>>,
    active: BTreeSet<BatchId>,
    /// Journal entries appended since the last snapshot.
    entries_since_snapshot: usize,
    last_sequence: u64,
    escalations: Vec<(BatchId, BatcherError)>,
}

impl CoordinationActor for BatchSupervisor {
    fn name(&self) -> &'static str {
        "BatchSupervisor"
    }

    fn context(&self) -> &Arc<CoordinationContext> {
        &self.context
    }

    fn started(&mut self) -> BatcherResult<()> {
        info!(actor = %self.name(), "Supervisor started");
        Ok(())
    }

    fn stopped(&mut self) -> BatcherResult<()> {
        info!(
            actor = %self.name(),
            active = self.active.len(),
            "Supervisor stopped"
        );
        Ok(())
    }
}

impl BatchSupervisor {
    /// Spawn the supervisor: recover the active set from the journal,
    /// recreate a coordinator for every remaining active identity, subscribe
    /// to the event bus, and start the routing loop.
    pub async fn spawn(context: Arc<CoordinationContext>) -> BatcherResult<SupervisorHandle> {
        let (mailbox_tx, mailbox) = mpsc::channel(context.config.mailbox_buffer);
        let routing = Arc::new(DashMap::new());

        let mut supervisor = Self {
            context: Arc::clone(&context),
            mailbox,
            mailbox_tx: mailbox_tx.clone(),
            routing: Arc::clone(&routing),
            active: BTreeSet::new(),
            entries_since_snapshot: 0,
            last_sequence: 0,
            escalations: Vec::new(),
        };

        supervisor.started()?;
        supervisor.recover().await?;
        supervisor.subscribe_to_bus();

        let handle = SupervisorHandle {
            tx: mailbox_tx,
            routing,
            context,
        };
        tokio::spawn(supervisor.run());
        Ok(handle)
    }

    async fn run(mut self) {
        while let Some(message) = self.mailbox.recv().await {
            match message {
                SupervisorMessage::Execute {
                    batch_id,
                    request,
                    resp,
                } => {
                    if let Err(e) = self.handle_execute(batch_id.clone(), request, resp).await {
                        error!(batch_id = %batch_id, error = %e, "Failed to route execute-batch request");
                    }
                }
                SupervisorMessage::KillBatch { batch_id } => {
                    self.handle_kill(batch_id).await;
                }
                SupervisorMessage::BusEvent(published) => {
                    if let Err(e) = self.handle_bus_event(published.event).await {
                        error!(error = %e, "Failed to apply bus event to active set");
                    }
                }
                SupervisorMessage::CoordinatorExited { batch_id, outcome } => {
                    self.handle_coordinator_exit(batch_id, outcome).await;
                }
                SupervisorMessage::ActiveBatches { resp } => {
                    let _ = resp.send(self.active.clone());
                }
                SupervisorMessage::Escalations { resp } => {
                    let _ = resp.send(self.escalations.clone());
                }
                SupervisorMessage::Shutdown { resp } => {
                    self.handle_shutdown().await;
                    let _ = resp.send(());
                    break;
                }
            }
        }

        if let Err(e) = self.stopped() {
            warn!(error = %e, "Supervisor stop hook failed");
        }
    }

    // =========================================================================
    // Routing
    // =========================================================================

    async fn handle_execute(
        &mut self,
        batch_id: BatchId,
        request: ExecuteBatchRequest,
        resp: ExecuteResponder,
    ) -> BatcherResult<()> {
        self.context.update_stats(|s| s.batches_submitted += 1);

        // Clone the handle out of the map guard before any mutation of the
        // routing table.
        let existing = self
            .routing
            .get(&batch_id)
            .filter(|entry| !entry.is_closed())
            .map(|entry| entry.value().clone());
        let handle = match existing {
            Some(handle) => handle,
            None => self.spawn_coordinator(batch_id.clone(), false),
        };

        debug!(
            batch_id = %batch_id,
            commands = request.commands.len(),
            requester = ?request.metadata.requester,
            "Routing execute-batch request"
        );
        handle.execute(request.commands, resp).await
    }

    async fn handle_kill(&mut self, batch_id: BatchId) {
        // Do not hold the map guard across the await.
        let handle = self.routing.get(&batch_id).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => {
                if let Err(e) = handle.kill().await {
                    warn!(batch_id = %batch_id, error = %e, "Kill signal could not be delivered");
                }
            }
            None => {
                warn!(batch_id = %batch_id, "Kill requested for unknown batch - ignored");
            }
        }
    }

    fn spawn_coordinator(&mut self, batch_id: BatchId, recover: bool) -> CoordinatorHandle {
        let (handle, join) = BatchCoordinator::spawn(batch_id.clone(), Arc::clone(&self.context), recover);
        self.routing.insert(batch_id.clone(), handle.clone());

        // Monitor task: relays the exit outcome back into the sequential
        // loop, where the supervision policy is applied.
        let mailbox = self.mailbox_tx.clone();
        tokio::spawn(async move {
            let outcome = match join.await {
                Ok(result) => result,
                Err(join_error) => Err(BatcherError::CoordinationError(format!(
                    "Coordinator task aborted: {join_error}"
                ))),
            };
            let _ = mailbox
                .send(SupervisorMessage::CoordinatorExited {
                    batch_id,
                    outcome,
                })
                .await;
        });

        handle
    }

    // =========================================================================
    // Supervision policy
    // =========================================================================

    async fn handle_coordinator_exit(
        &mut self,
        batch_id: BatchId,
        outcome: BatcherResult<StopReason>,
    ) {
        self.routing.remove(&batch_id);

        match outcome {
            Ok(reason @ (StopReason::Finished | StopReason::Idle)) => {
                debug!(batch_id = %batch_id, reason = ?reason, "Coordinator exited");
                // The bus is best-effort and may have lagged past the
                // finished milestone; the exit signal is not lossy, so the
                // active set is drained from here as well. Removal is
                // idempotent, so the usual double delivery is harmless.
                if let Err(e) = self.mark_finished(batch_id).await {
                    error!(error = %e, "Failed to drain active set on coordinator exit");
                }
            }
            Ok(reason) => {
                debug!(batch_id = %batch_id, reason = ?reason, "Coordinator exited");
            }
            Err(e) if e.is_transient() => {
                // Narrow transient fault: restart that one instance in
                // recovery mode.
                warn!(
                    batch_id = %batch_id,
                    error = %e,
                    "Coordinator hit a transient fault - restarting"
                );
                self.context.update_stats(|s| s.coordinator_restarts += 1);
                self.spawn_coordinator(batch_id, true);
            }
            Err(e) => {
                // Fail-loud default: escalate, never silently retry.
                error!(
                    batch_id = %batch_id,
                    error = %e,
                    "Coordinator failed - escalating"
                );
                self.context.update_stats(|s| s.escalated_failures += 1);
                self.escalations.push((batch_id, e));
            }
        }
    }

    // =========================================================================
    // Active-set maintenance
    // =========================================================================

    fn subscribe_to_bus(&self) {
        let mut rx = self.context.publisher.subscribe();
        let mailbox = self.mailbox_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(published) => {
                        if mailbox
                            .send(SupervisorMessage::BusEvent(published))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event-bus subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_bus_event(&mut self, event: BatchEvent) -> BatcherResult<()> {
        match event {
            BatchEvent::BatchStarted { batch_id, .. } => self.mark_started(batch_id).await,
            BatchEvent::BatchFinished { batch_id, .. } => self.mark_finished(batch_id).await,
            BatchEvent::BatchCommandCompleted { .. } => Ok(()),
        }
    }

    /// Idempotent add: a second `BatchStarted` for a present identity is a
    /// no-op and appends nothing.
    async fn mark_started(&mut self, batch_id: BatchId) -> BatcherResult<()> {
        if !self.active.insert(batch_id.clone()) {
            return Ok(());
        }
        debug!(batch_id = %batch_id, active = self.active.len(), "Batch marked active");
        self.persist_mirror(SupervisorEvent::BatchStartedSeen { batch_id })
            .await
    }

    /// Idempotent remove: finishing an already-absent identity is a no-op.
    async fn mark_finished(&mut self, batch_id: BatchId) -> BatcherResult<()> {
        if !self.active.remove(&batch_id) {
            return Ok(());
        }
        debug!(batch_id = %batch_id, active = self.active.len(), "Batch marked finished");
        self.persist_mirror(SupervisorEvent::BatchFinishedSeen { batch_id })
            .await
    }

    async fn persist_mirror(&mut self, event: SupervisorEvent) -> BatcherResult<()> {
        let sequence = self
            .context
            .journal
            .append(SUPERVISOR_ENTITY, JournalEvent::Supervisor(event))
            .await?;
        self.last_sequence = sequence;
        self.entries_since_snapshot += 1;

        if self.entries_since_snapshot >= self.context.config.snapshot_threshold {
            self.snapshot_active_set().await?;
        }
        Ok(())
    }

    /// Bound replay cost: snapshot the active set and truncate the mirrored
    /// log up to the snapshotted point.
    async fn snapshot_active_set(&mut self) -> BatcherResult<()> {
        let state = serde_json::to_value(&self.active)?;
        self.context
            .journal
            .save_snapshot(SUPERVISOR_ENTITY, self.last_sequence, state)
            .await?;
        self.context
            .journal
            .truncate(SUPERVISOR_ENTITY, self.last_sequence + 1)
            .await?;
        self.entries_since_snapshot = 0;

        info!(
            active = self.active.len(),
            sequence = self.last_sequence,
            "Active set snapshotted and log truncated"
        );
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    async fn recover(&mut self) -> BatcherResult<()> {
        let recovery = self.context.journal.replay(SUPERVISOR_ENTITY).await?;

        if let Some(snapshot) = recovery.snapshot {
            self.active = serde_json::from_value(snapshot.state)?;
            self.last_sequence = snapshot.sequence;
        }

        for record in recovery.events {
            self.last_sequence = record.sequence;
            match record.event {
                JournalEvent::Supervisor(SupervisorEvent::BatchStartedSeen { batch_id }) => {
                    self.active.insert(batch_id);
                }
                JournalEvent::Supervisor(SupervisorEvent::BatchFinishedSeen { batch_id }) => {
                    self.active.remove(&batch_id);
                }
                JournalEvent::Batch(event) => {
                    warn!(event = ?event, "Batch event in supervisor entity - ignored");
                }
            }
        }

        if self.active.is_empty() {
            return Ok(());
        }

        info!(
            active = self.active.len(),
            "Recovering coordinators for active batches"
        );
        for batch_id in self.active.clone() {
            // Each instance independently recovers its own state from its
            // own journal entity.
            self.spawn_coordinator(batch_id, true);
        }
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    async fn handle_shutdown(&mut self) {
        info!(
            live = self.routing.len(),
            "Supervisor shutting down - killing live coordinators"
        );
        let handles: Vec<CoordinatorHandle> =
            self.routing.iter().map(|entry| entry.value().clone()).collect();
        for handle in handles {
            if let Err(e) = handle.kill().await {
                warn!(batch_id = %handle.batch_id(), error = %e, "Coordinator already stopped");
            }
        }
        // Exit outcomes can no longer be processed once the loop stops, so
        // the routing table is emptied here.
        self.routing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatcherConfig;
    use crate::forwarder::{CommandForwarder, OutcomeSink};
    use crate::journal::InMemoryJournal;
    use async_trait::async_trait;

    struct NullForwarder;

    #[async_trait]
    impl CommandForwarder for NullForwarder {
        async fn dispatch(
            &self,
            _command: crate::messages::BatchCommand,
            _correlation: crate::correlation::InternalCorrelationId,
            _dry_run: bool,
            _outcome_sink: OutcomeSink,
        ) -> BatcherResult<()> {
            Ok(())
        }
    }

    fn bare_supervisor(journal: Arc<InMemoryJournal>) -> BatchSupervisor {
        let context = crate::context::CoordinationContext::new(
            Arc::new(NullForwarder),
            journal,
            BatcherConfig::default(),
        );
        let (mailbox_tx, mailbox) = mpsc::channel(8);
        BatchSupervisor {
            context,
            mailbox,
            mailbox_tx,
            routing: Arc::new(DashMap::new()),
            active: BTreeSet::new(),
            entries_since_snapshot: 0,
            last_sequence: 0,
            escalations: Vec::new(),
        }
    }

    #[test]
    fn test_supervisor_handle_is_cloneable() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<SupervisorHandle>();
    }

    #[test]
    fn test_supervisor_messages_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SupervisorMessage>();
    }

    #[tokio::test]
    async fn test_finished_exit_drains_active_set_without_bus_delivery() {
        let journal = Arc::new(InMemoryJournal::new());
        let mut supervisor = bare_supervisor(Arc::clone(&journal));

        // Active via the mirror path; no bus subscriber exists at all, so a
        // finished milestone can only arrive through the exit outcome.
        let batch_id = BatchId::new("B1");
        supervisor.mark_started(batch_id.clone()).await.unwrap();
        assert!(supervisor.active.contains(&batch_id));

        supervisor
            .handle_coordinator_exit(batch_id.clone(), Ok(StopReason::Finished))
            .await;
        assert!(supervisor.active.is_empty());

        let mirrored = journal.events_for(SUPERVISOR_ENTITY);
        assert!(mirrored.iter().any(|event| matches!(
            event,
            crate::journal::JournalEvent::Supervisor(SupervisorEvent::BatchFinishedSeen { .. })
        )));
    }

    #[tokio::test]
    async fn test_idle_exit_drains_active_set() {
        let journal = Arc::new(InMemoryJournal::new());
        let mut supervisor = bare_supervisor(journal);

        // A recovered coordinator whose batch already finished exits Idle;
        // the identity must not stay active across restarts.
        let batch_id = BatchId::new("B2");
        supervisor.mark_started(batch_id.clone()).await.unwrap();
        supervisor
            .handle_coordinator_exit(batch_id, Ok(StopReason::Idle))
            .await;
        assert!(supervisor.active.is_empty());
    }

    #[tokio::test]
    async fn test_killed_exit_keeps_batch_active() {
        let journal = Arc::new(InMemoryJournal::new());
        let mut supervisor = bare_supervisor(journal);

        // A kill mid-commit is not completion: the identity stays active so
        // a later recovery can resume the batch.
        let batch_id = BatchId::new("B3");
        supervisor.mark_started(batch_id.clone()).await.unwrap();
        supervisor
            .handle_coordinator_exit(batch_id.clone(), Ok(StopReason::Killed))
            .await;
        assert!(supervisor.active.contains(&batch_id));
    }
}
