//! Durable Entity Log boundary.
//!
//! Per-entity-identity ordered event log with replay-on-start and optional
//! snapshotting. The log itself is an external collaborator; this module
//! specifies the interface the core depends on, plus an in-memory
//! implementation used by the test suite and local runs.
//!
//! The log guarantees at-most-one live writer per entity identity. The core
//! assumes this and performs no additional locking.

pub mod memory;

pub use memory::InMemoryJournal;

use crate::error::BatcherResult;
use crate::events::{BatchEvent, SupervisorEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Union of the event shapes persisted per entity: batch entities append
/// [`BatchEvent`]s, the supervisor's own entity appends mirror
/// [`SupervisorEvent`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalEvent {
    Batch(BatchEvent),
    Supervisor(SupervisorEvent),
}

/// One appended record with its per-entity sequence number (starting at 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub sequence: u64,
    pub event: JournalEvent,
}

/// Snapshot of an entity's state as of a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalSnapshot {
    pub sequence: u64,
    pub state: serde_json::Value,
}

/// Everything needed to rebuild an entity: the latest snapshot (if any) and
/// the ordered events appended after it.
#[derive(Debug, Clone, Default)]
pub struct JournalRecovery {
    pub snapshot: Option<JournalSnapshot>,
    pub events: Vec<JournalRecord>,
}

/// Append-only per-entity event store with ordered replay and snapshotting.
#[async_trait]
pub trait EntityJournal: Send + Sync {
    /// Append an event for an entity; returns the assigned sequence number.
    async fn append(&self, entity_id: &str, event: JournalEvent) -> BatcherResult<u64>;

    /// Replay an entity: latest snapshot plus events in persisted order.
    /// An entity that was never written replays as empty.
    async fn replay(&self, entity_id: &str) -> BatcherResult<JournalRecovery>;

    /// Record a snapshot of the entity's state as of `sequence`.
    async fn save_snapshot(
        &self,
        entity_id: &str,
        sequence: u64,
        state: serde_json::Value,
    ) -> BatcherResult<()>;

    /// Drop all records with sequence strictly below `before_sequence`.
    async fn truncate(&self, entity_id: &str, before_sequence: u64) -> BatcherResult<()>;
}
