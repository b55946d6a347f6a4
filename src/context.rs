//! Shared system context for coordination actors.
//!
//! Bundles the external collaborators (forwarder, journal, event bus) with
//! configuration and shared counters so actors take one `Arc` instead of a
//! parameter list.

use crate::config::BatcherConfig;
use crate::events::EventPublisher;
use crate::forwarder::CommandForwarder;
use crate::journal::EntityJournal;
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Shared dependencies for the supervisor and every coordinator.
pub struct CoordinationContext {
    pub forwarder: Arc<dyn CommandForwarder>,
    pub journal: Arc<dyn EntityJournal>,
    pub publisher: EventPublisher,
    pub config: BatcherConfig,
    pub stats: Arc<RwLock<CoordinationStats>>,
}

impl CoordinationContext {
    pub fn new(
        forwarder: Arc<dyn CommandForwarder>,
        journal: Arc<dyn EntityJournal>,
        config: BatcherConfig,
    ) -> Arc<Self> {
        let publisher = EventPublisher::new(config.event_channel_capacity);
        Arc::new(Self {
            forwarder,
            journal,
            publisher,
            config,
            stats: Arc::new(RwLock::new(CoordinationStats::default())),
        })
    }

    /// Snapshot of the shared counters.
    pub fn stats_snapshot(&self) -> CoordinationStats {
        self.stats.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub(crate) fn update_stats(&self, update: impl FnOnce(&mut CoordinationStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());
        update(&mut stats);
    }
}

impl std::fmt::Debug for CoordinationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Processing counters for observability and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinationStats {
    pub batches_submitted: u64,
    pub batches_accepted: u64,
    pub batches_rejected: u64,
    pub duplicate_submissions: u64,
    pub batches_completed: u64,
    pub commands_dispatched: u64,
    pub coordinator_restarts: u64,
    pub escalated_failures: u64,
}
