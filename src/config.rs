//! Configuration for the batch coordination core.
//!
//! Explicit configuration structs passed into constructors - there is no
//! global mutable configuration. Values come from `Default` or from
//! environment variables via [`BatcherConfig::from_env`].

use crate::error::{BatcherError, BatcherResult};
use std::time::Duration;

/// Tunables for the supervisor and its coordinator population.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// How long a finished (or aborted) coordinator lingers before it stops
    /// and is removed from the routing table.
    pub shutdown_grace: Duration,
    /// Number of supervisor journal entries appended since the last snapshot
    /// that triggers a new snapshot plus log truncation.
    pub snapshot_threshold: usize,
    /// Capacity of the broadcast channel backing the event bus.
    pub event_channel_capacity: usize,
    /// Buffer size for coordinator and supervisor mailboxes.
    pub mailbox_buffer: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(60),
            snapshot_threshold: 50,
            event_channel_capacity: 1000,
            mailbox_buffer: 64,
        }
    }
}

impl BatcherConfig {
    pub fn from_env() -> BatcherResult<Self> {
        let mut config = Self::default();

        if let Ok(grace_ms) = std::env::var("BATCHER_SHUTDOWN_GRACE_MS") {
            let millis: u64 = grace_ms.parse().map_err(|e| {
                BatcherError::ConfigurationError(format!("Invalid shutdown_grace_ms: {e}"))
            })?;
            config.shutdown_grace = Duration::from_millis(millis);
        }

        if let Ok(threshold) = std::env::var("BATCHER_SNAPSHOT_THRESHOLD") {
            config.snapshot_threshold = threshold.parse().map_err(|e| {
                BatcherError::ConfigurationError(format!("Invalid snapshot_threshold: {e}"))
            })?;
        }

        if let Ok(capacity) = std::env::var("BATCHER_EVENT_CAPACITY") {
            config.event_channel_capacity = capacity.parse().map_err(|e| {
                BatcherError::ConfigurationError(format!("Invalid event_channel_capacity: {e}"))
            })?;
        }

        if let Ok(buffer) = std::env::var("BATCHER_MAILBOX_BUFFER") {
            config.mailbox_buffer = buffer.parse().map_err(|e| {
                BatcherError::ConfigurationError(format!("Invalid mailbox_buffer: {e}"))
            })?;
        }

        Ok(config)
    }
}
