//! Shared test infrastructure: a scriptable mock command forwarder, a
//! fault-injecting journal wrapper, and context builders with test-friendly
//! grace periods.

#![allow(dead_code)]

use async_trait::async_trait;
use batcher_core::config::BatcherConfig;
use batcher_core::context::CoordinationContext;
use batcher_core::correlation::InternalCorrelationId;
use batcher_core::error::{BatcherError, BatcherResult};
use batcher_core::forwarder::{CommandForwarder, OutcomeSink};
use batcher_core::journal::{
    EntityJournal, InMemoryJournal, JournalEvent, JournalRecovery,
};
use batcher_core::messages::{BatchCommand, CommandOutcome};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How the mock forwarder answers a dispatch for one original correlation id.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Deliver this outcome asynchronously, as the real forwarder would.
    Auto(CommandOutcome),
    /// Record the dispatch but withhold the outcome until `release` is called.
    Hold,
    /// Fail the dispatch call itself.
    FailDispatch(BatcherError),
}

/// One recorded dispatch, in arrival order.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub correlation: InternalCorrelationId,
    pub dry_run: bool,
}

#[derive(Default)]
struct MockState {
    /// Keyed by (original correlation id, dry_run).
    behaviors: HashMap<(String, bool), Behavior>,
    dispatches: Vec<DispatchRecord>,
    held: HashMap<(String, bool), (InternalCorrelationId, OutcomeSink)>,
}

/// Scriptable forwarder double. Defaults to auto-success for every dispatch.
#[derive(Default)]
pub struct MockForwarder {
    state: Mutex<MockState>,
}

impl MockForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the behavior for one (original id, dry_run) pair.
    pub fn script(&self, original: &str, dry_run: bool, behavior: Behavior) {
        let mut state = self.state.lock();
        state
            .behaviors
            .insert((original.to_string(), dry_run), behavior);
    }

    /// Deliver the outcome for a previously held dispatch.
    pub async fn release(&self, original: &str, dry_run: bool, outcome: CommandOutcome) {
        let held = {
            let mut state = self.state.lock();
            state.held.remove(&(original.to_string(), dry_run))
        };
        let (correlation, sink) = held.unwrap_or_else(|| {
            panic!("no held dispatch for ({original}, dry_run={dry_run})")
        });
        sink.deliver(correlation, outcome).await.unwrap();
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.state.lock().dispatches.clone()
    }

    pub fn dry_run_count(&self) -> usize {
        self.state
            .lock()
            .dispatches
            .iter()
            .filter(|d| d.dry_run)
            .count()
    }

    pub fn real_count(&self) -> usize {
        self.state
            .lock()
            .dispatches
            .iter()
            .filter(|d| !d.dry_run)
            .count()
    }

    /// Every dry-run dispatch arrived before every real dispatch.
    pub fn dry_runs_precede_real(&self) -> bool {
        let dispatches = self.dispatches();
        let first_real = dispatches.iter().position(|d| !d.dry_run);
        match first_real {
            Some(index) => dispatches[index..].iter().all(|d| !d.dry_run),
            None => true,
        }
    }
}

#[async_trait]
impl CommandForwarder for MockForwarder {
    async fn dispatch(
        &self,
        command: BatchCommand,
        correlation: InternalCorrelationId,
        dry_run: bool,
        outcome_sink: OutcomeSink,
    ) -> BatcherResult<()> {
        let key = (command.original_correlation_id.clone(), dry_run);
        let behavior = {
            let mut state = self.state.lock();
            state.dispatches.push(DispatchRecord {
                correlation: correlation.clone(),
                dry_run,
            });
            state.behaviors.get(&key).cloned()
        };

        match behavior {
            Some(Behavior::FailDispatch(error)) => Err(error),
            Some(Behavior::Hold) => {
                let mut state = self.state.lock();
                state.held.insert(key, (correlation, outcome_sink));
                Ok(())
            }
            Some(Behavior::Auto(outcome)) => {
                deliver_async(outcome_sink, correlation, outcome);
                Ok(())
            }
            None => {
                let payload = serde_json::json!({"echo": command.payload});
                deliver_async(outcome_sink, correlation, CommandOutcome::success(payload));
                Ok(())
            }
        }
    }
}

/// Deliver on a separate task so the coordinator is never blocked on its own
/// dispatch call, matching the asynchronous real forwarder.
fn deliver_async(sink: OutcomeSink, correlation: InternalCorrelationId, outcome: CommandOutcome) {
    tokio::spawn(async move {
        sink.deliver(correlation, outcome).await.ok();
    });
}

/// Journal wrapper that fails the next N appends matching a predicate, for
/// exercising the supervision policy.
pub struct FlakyJournal {
    inner: Arc<InMemoryJournal>,
    failures_remaining: AtomicUsize,
    error: BatcherError,
    fail_on: fn(&JournalEvent) -> bool,
}

impl FlakyJournal {
    pub fn new(
        inner: Arc<InMemoryJournal>,
        failures: usize,
        error: BatcherError,
        fail_on: fn(&JournalEvent) -> bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures_remaining: AtomicUsize::new(failures),
            error,
            fail_on,
        })
    }
}

#[async_trait]
impl EntityJournal for FlakyJournal {
    async fn append(&self, entity_id: &str, event: JournalEvent) -> BatcherResult<u64> {
        if (self.fail_on)(&event) {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0
                && self
                    .failures_remaining
                    .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Err(self.error.clone());
            }
        }
        self.inner.append(entity_id, event).await
    }

    async fn replay(&self, entity_id: &str) -> BatcherResult<JournalRecovery> {
        self.inner.replay(entity_id).await
    }

    async fn save_snapshot(
        &self,
        entity_id: &str,
        sequence: u64,
        state: serde_json::Value,
    ) -> BatcherResult<()> {
        self.inner.save_snapshot(entity_id, sequence, state).await
    }

    async fn truncate(&self, entity_id: &str, before_sequence: u64) -> BatcherResult<()> {
        self.inner.truncate(entity_id, before_sequence).await
    }
}

/// Config with a short grace period so shutdown tests finish quickly.
pub fn test_config(grace: Duration) -> BatcherConfig {
    BatcherConfig {
        shutdown_grace: grace,
        ..BatcherConfig::default()
    }
}

/// Standard test rig: mock forwarder, in-memory journal, shared context.
pub fn test_context(
    grace: Duration,
) -> (Arc<MockForwarder>, Arc<InMemoryJournal>, Arc<CoordinationContext>) {
    let forwarder = MockForwarder::new();
    let journal = Arc::new(InMemoryJournal::new());
    let context = CoordinationContext::new(
        forwarder.clone(),
        journal.clone(),
        test_config(grace),
    );
    (forwarder, journal, context)
}

/// Poll until `check` passes or the deadline expires.
pub async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
