//! Crash-recovery and supervision-policy tests: journal replay, transient
//! restart, escalation, and the supervisor's compacted active-set log.

mod common;

use batcher_core::actors::{BatchSupervisor, SUPERVISOR_ENTITY};
use batcher_core::context::CoordinationContext;
use batcher_core::correlation::{BatchId, InternalCorrelationId};
use batcher_core::error::BatcherError;
use batcher_core::events::{BatchEvent, RecordedCommand, SupervisorEvent};
use batcher_core::journal::{EntityJournal, InMemoryJournal, JournalEvent};
use batcher_core::messages::{
    BatchCommand, CommandOutcome, ExecuteBatchRequest, ExecuteBatchResponse,
};
use batcher_core::state_machine::BatchState;
use chrono::Utc;
use common::{test_config, test_context, wait_until, Behavior, FlakyJournal, MockForwarder};
use std::sync::Arc;
use std::time::Duration;

fn recorded(batch_id: &BatchId, original: &str) -> RecordedCommand {
    RecordedCommand {
        correlation: InternalCorrelationId::mint(batch_id.clone(), original),
        command: BatchCommand::new(original, serde_json::json!({ "op": original })),
    }
}

async fn seed_committed_batch(
    journal: &InMemoryJournal,
    batch_id: &BatchId,
    commands: Vec<RecordedCommand>,
) {
    journal
        .append(
            batch_id.as_str(),
            JournalEvent::Batch(BatchEvent::BatchStarted {
                batch_id: batch_id.clone(),
                at: Utc::now(),
                commands,
            }),
        )
        .await
        .unwrap();
    journal
        .append(
            SUPERVISOR_ENTITY,
            JournalEvent::Supervisor(SupervisorEvent::BatchStartedSeen {
                batch_id: batch_id.clone(),
            }),
        )
        .await
        .unwrap();
}

fn finished_outcomes(
    journal: &InMemoryJournal,
    batch_id: &BatchId,
) -> Option<Vec<(String, CommandOutcome)>> {
    journal
        .batch_events_for(batch_id.as_str())
        .into_iter()
        .find_map(|event| match event {
            BatchEvent::BatchFinished {
                collected_outcomes, ..
            } => Some(collected_outcomes),
            _ => None,
        })
}

#[tokio::test]
async fn test_committed_batch_resumes_after_crash() {
    let (forwarder, journal, context) = test_context(Duration::from_millis(50));
    let batch_id = BatchId::new("B1");

    // A prior process committed this batch and crashed before any outcome
    // arrived.
    let commands = vec![
        recorded(&batch_id, "c1"),
        recorded(&batch_id, "c2"),
        recorded(&batch_id, "c3"),
    ];
    seed_committed_batch(&journal, &batch_id, commands).await;

    let supervisor = BatchSupervisor::spawn(context).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(3), || {
            finished_outcomes(&journal, &batch_id).is_some()
        })
        .await,
        "recovered batch never finished"
    );

    // Validation already happened before the crash: only real executions
    // are re-dispatched.
    assert_eq!(forwarder.dry_run_count(), 0);
    assert_eq!(forwarder.real_count(), 3);
    assert_eq!(finished_outcomes(&journal, &batch_id).unwrap().len(), 3);

    assert!(
        wait_until(Duration::from_secs(3), || supervisor.live_coordinators() == 0).await,
        "recovered coordinator never stopped"
    );
}

#[tokio::test]
async fn test_recovery_keys_outcomes_by_original_correlation_id() {
    let (forwarder, journal, context) = test_context(Duration::from_millis(50));
    let batch_id = BatchId::new("B2");

    // One command already completed before the crash; the completed event
    // carries the exact internal id minted at commit time.
    let done = recorded(&batch_id, "c1");
    let remaining = recorded(&batch_id, "c2");
    seed_committed_batch(&journal, &batch_id, vec![done.clone(), remaining]).await;
    journal
        .append(
            batch_id.as_str(),
            JournalEvent::Batch(BatchEvent::BatchCommandCompleted {
                correlation: done.correlation,
                outcome: CommandOutcome::success(serde_json::json!({"pre": true})),
                at: Utc::now(),
            }),
        )
        .await
        .unwrap();

    let _supervisor = BatchSupervisor::spawn(context).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(3), || {
            finished_outcomes(&journal, &batch_id).is_some()
        })
        .await,
        "recovered batch never finished"
    );

    // The already-completed command is not re-dispatched, and every
    // collected outcome is keyed by the caller's original id - including
    // the one restored from replay.
    assert_eq!(forwarder.real_count(), 1);
    let mut keys: Vec<String> = finished_outcomes(&journal, &batch_id)
        .unwrap()
        .into_iter()
        .map(|(original, _)| original)
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["c1".to_string(), "c2".to_string()]);
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let (_forwarder, journal, context) = test_context(Duration::from_millis(50));
    let batch_id = BatchId::new("B3");

    let request = ExecuteBatchRequest::new(
        Some(batch_id.clone()),
        vec![
            BatchCommand::new("c1", serde_json::json!({})),
            BatchCommand::new("c2", serde_json::json!({})),
        ],
    );
    let supervisor = BatchSupervisor::spawn(context).await.unwrap();
    let (_, reply) = supervisor.execute_batch(request).await.unwrap();
    assert!(matches!(
        reply.await.unwrap(),
        ExecuteBatchResponse::Accepted { .. }
    ));
    assert!(
        wait_until(Duration::from_secs(3), || {
            finished_outcomes(&journal, &batch_id).is_some()
        })
        .await,
        "batch never finished"
    );

    // Folding the journal twice yields the same state both times.
    let events = journal.batch_events_for(batch_id.as_str());
    let first = BatchState::replay(batch_id.clone(), events.iter());
    let second = BatchState::replay(batch_id.clone(), events.iter());
    assert_eq!(first.phase, second.phase);
    assert_eq!(first.collected_outcomes, second.collected_outcomes);
    assert!(first.is_drained());
}

#[tokio::test]
async fn test_transient_journal_fault_restarts_coordinator() {
    let forwarder = MockForwarder::new();
    let inner = Arc::new(InMemoryJournal::new());
    // First completion append fails with a transient fault, killing the
    // coordinator after commit.
    let flaky = FlakyJournal::new(
        Arc::clone(&inner),
        1,
        BatcherError::Transient("journal handle lost".to_string()),
        |event| matches!(event, JournalEvent::Batch(BatchEvent::BatchCommandCompleted { .. })),
    );
    let context = CoordinationContext::new(
        forwarder.clone(),
        flaky,
        test_config(Duration::from_millis(50)),
    );
    let supervisor = BatchSupervisor::spawn(context).await.unwrap();

    let batch_id = BatchId::new("B4");
    let request = ExecuteBatchRequest::new(
        Some(batch_id.clone()),
        vec![BatchCommand::new("c1", serde_json::json!({}))],
    );
    let (_, reply) = supervisor.execute_batch(request).await.unwrap();
    assert!(matches!(
        reply.await.unwrap(),
        ExecuteBatchResponse::Accepted { .. }
    ));

    // The supervisor restarts the instance in recovery mode and the batch
    // completes on the second attempt.
    assert!(
        wait_until(Duration::from_secs(3), || {
            finished_outcomes(&inner, &batch_id).is_some()
        })
        .await,
        "batch never finished after restart"
    );
    assert!(supervisor.stats().coordinator_restarts >= 1);
    assert!(supervisor.escalations().await.unwrap().is_empty());

    // Validation is never repeated on restart; the command was re-dispatched
    // for real execution once.
    assert_eq!(forwarder.dry_run_count(), 1);
    assert_eq!(forwarder.real_count(), 2);
}

#[tokio::test]
async fn test_non_transient_fault_escalates_without_restart() {
    let forwarder = MockForwarder::new();
    let inner = Arc::new(InMemoryJournal::new());
    // Every completion append fails with a non-transient fault.
    let flaky = FlakyJournal::new(
        Arc::clone(&inner),
        usize::MAX,
        BatcherError::JournalError("append refused".to_string()),
        |event| matches!(event, JournalEvent::Batch(BatchEvent::BatchCommandCompleted { .. })),
    );
    let context = CoordinationContext::new(
        forwarder.clone(),
        flaky,
        test_config(Duration::from_millis(50)),
    );
    let supervisor = BatchSupervisor::spawn(context).await.unwrap();

    let batch_id = BatchId::new("B5");
    let request = ExecuteBatchRequest::new(
        Some(batch_id.clone()),
        vec![BatchCommand::new("c1", serde_json::json!({}))],
    );
    let (_, reply) = supervisor.execute_batch(request).await.unwrap();
    assert!(matches!(
        reply.await.unwrap(),
        ExecuteBatchResponse::Accepted { .. }
    ));

    assert!(
        wait_until(Duration::from_secs(3), || supervisor.live_coordinators() == 0).await,
        "failed coordinator never removed"
    );

    let escalations = supervisor.escalations().await.unwrap();
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].0, batch_id);
    assert_eq!(supervisor.stats().escalated_failures, 1);
    assert_eq!(supervisor.stats().coordinator_restarts, 0);
    assert!(finished_outcomes(&inner, &batch_id).is_none());
}

#[tokio::test]
async fn test_active_set_is_snapshotted_and_truncated() {
    let forwarder = MockForwarder::new();
    let journal = Arc::new(InMemoryJournal::new());
    let mut config = test_config(Duration::from_millis(50));
    config.snapshot_threshold = 1;
    let context = CoordinationContext::new(forwarder.clone(), journal.clone(), config);
    let supervisor = BatchSupervisor::spawn(context).await.unwrap();

    let batch_id = BatchId::new("B6");
    let request = ExecuteBatchRequest::new(
        Some(batch_id.clone()),
        vec![BatchCommand::new("c1", serde_json::json!({}))],
    );
    let (_, reply) = supervisor.execute_batch(request).await.unwrap();
    assert!(matches!(
        reply.await.unwrap(),
        ExecuteBatchResponse::Accepted { .. }
    ));

    // Both mirror appends (started, finished) trip the threshold, so the
    // supervisor entity ends fully compacted.
    assert!(
        wait_until(Duration::from_secs(3), || {
            journal
                .snapshot_for(SUPERVISOR_ENTITY)
                .map(|s| s.state == serde_json::json!([]))
                .unwrap_or(false)
        })
        .await,
        "active set never compacted to empty"
    );
    assert_eq!(journal.record_count(SUPERVISOR_ENTITY), 0);
}

#[tokio::test]
async fn test_supervisor_recovers_from_snapshot_plus_tail() {
    let (forwarder, journal, context) = test_context(Duration::from_millis(50));

    // Compacted state says B1 and B2 are active; a later mirror entry
    // finished B2. Only B1 should be recovered.
    let b1 = BatchId::new("B1");
    let b2 = BatchId::new("B2");
    // Hold B1's re-dispatched command so it stays active while inspected.
    forwarder.script("c1", false, Behavior::Hold);
    seed_committed_batch(&journal, &b1, vec![recorded(&b1, "c1")]).await;
    journal
        .append(
            SUPERVISOR_ENTITY,
            JournalEvent::Supervisor(SupervisorEvent::BatchStartedSeen {
                batch_id: b2.clone(),
            }),
        )
        .await
        .unwrap();
    journal
        .save_snapshot(
            SUPERVISOR_ENTITY,
            2,
            serde_json::to_value([&b1, &b2]).unwrap(),
        )
        .await
        .unwrap();
    journal.truncate(SUPERVISOR_ENTITY, 3).await.unwrap();
    journal
        .append(
            SUPERVISOR_ENTITY,
            JournalEvent::Supervisor(SupervisorEvent::BatchFinishedSeen {
                batch_id: b2.clone(),
            }),
        )
        .await
        .unwrap();

    let supervisor = BatchSupervisor::spawn(context).await.unwrap();
    let active = supervisor.active_batches().await.unwrap();
    assert!(active.contains(&b1));
    assert!(!active.contains(&b2));

    // B1's coordinator recovers and finishes its one committed command.
    assert!(
        wait_until(Duration::from_secs(3), || forwarder.real_count() == 1).await,
        "recovered command never re-dispatched"
    );
    forwarder
        .release("c1", false, CommandOutcome::success(serde_json::json!({})))
        .await;
    assert!(
        wait_until(Duration::from_secs(3), || {
            finished_outcomes(&journal, &b1).is_some()
        })
        .await,
        "recovered batch never finished"
    );
    assert_eq!(forwarder.dry_run_count(), 0);
    assert_eq!(forwarder.real_count(), 1);
}
