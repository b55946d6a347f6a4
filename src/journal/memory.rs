//! In-memory entity journal.
//!
//! Backs the test suite and local runs. Sequence numbers are monotonic per
//! entity and survive truncation, matching the contract a real log provides.

use crate::error::BatcherResult;
use crate::events::BatchEvent;
use crate::journal::{EntityJournal, JournalEvent, JournalRecord, JournalRecovery, JournalSnapshot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct EntityLog {
    next_sequence: u64,
    snapshot: Option<JournalSnapshot>,
    records: Vec<JournalRecord>,
}

impl EntityLog {
    fn assign_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }
}

/// Thread-safe in-memory implementation of [`EntityJournal`].
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entities: Mutex<HashMap<String, EntityLog>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any durable trace exists for this entity (test introspection).
    pub fn has_entity(&self, entity_id: &str) -> bool {
        let entities = self.entities.lock();
        entities
            .get(entity_id)
            .map(|log| log.snapshot.is_some() || !log.records.is_empty())
            .unwrap_or(false)
    }

    /// All currently retained events for an entity, in order.
    pub fn events_for(&self, entity_id: &str) -> Vec<JournalEvent> {
        let entities = self.entities.lock();
        entities
            .get(entity_id)
            .map(|log| log.records.iter().map(|r| r.event.clone()).collect())
            .unwrap_or_default()
    }

    /// Batch events for an entity, skipping supervisor mirror events.
    pub fn batch_events_for(&self, entity_id: &str) -> Vec<BatchEvent> {
        self.events_for(entity_id)
            .into_iter()
            .filter_map(|event| match event {
                JournalEvent::Batch(batch_event) => Some(batch_event),
                JournalEvent::Supervisor(_) => None,
            })
            .collect()
    }

    /// Latest snapshot for an entity, if one was saved.
    pub fn snapshot_for(&self, entity_id: &str) -> Option<JournalSnapshot> {
        let entities = self.entities.lock();
        entities.get(entity_id).and_then(|log| log.snapshot.clone())
    }

    /// Number of retained (post-truncation) records for an entity.
    pub fn record_count(&self, entity_id: &str) -> usize {
        let entities = self.entities.lock();
        entities
            .get(entity_id)
            .map(|log| log.records.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EntityJournal for InMemoryJournal {
    async fn append(&self, entity_id: &str, event: JournalEvent) -> BatcherResult<u64> {
        let mut entities = self.entities.lock();
        let log = entities.entry(entity_id.to_string()).or_default();
        let sequence = log.assign_sequence();
        log.records.push(JournalRecord { sequence, event });
        Ok(sequence)
    }

    async fn replay(&self, entity_id: &str) -> BatcherResult<JournalRecovery> {
        let entities = self.entities.lock();
        Ok(entities
            .get(entity_id)
            .map(|log| JournalRecovery {
                snapshot: log.snapshot.clone(),
                events: log.records.clone(),
            })
            .unwrap_or_default())
    }

    async fn save_snapshot(
        &self,
        entity_id: &str,
        sequence: u64,
        state: serde_json::Value,
    ) -> BatcherResult<()> {
        let mut entities = self.entities.lock();
        let log = entities.entry(entity_id.to_string()).or_default();
        log.snapshot = Some(JournalSnapshot { sequence, state });
        Ok(())
    }

    async fn truncate(&self, entity_id: &str, before_sequence: u64) -> BatcherResult<()> {
        let mut entities = self.entities.lock();
        if let Some(log) = entities.get_mut(entity_id) {
            log.records.retain(|r| r.sequence >= before_sequence);
        }
        Ok(())
    }
}
