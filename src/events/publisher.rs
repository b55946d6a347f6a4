//! Best-effort publish/subscribe for batch lifecycle milestones.
//!
//! The bus is not relied upon for correctness: publishing with no subscribers
//! is fine, and a lagging subscriber misses events rather than applying
//! backpressure. The supervisor subscribes to keep its active set
//! synchronized even when a coordinator lives on another node of the same
//! logical service.

use crate::events::BatchEvent;
use tokio::sync::broadcast;

/// High-throughput event publisher for batch lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: BatchEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a lifecycle event.
    ///
    /// A broadcast send fails only when there are no subscribers, which is
    /// acceptable here - milestones are published regardless of listeners.
    pub fn publish(&self, event: BatchEvent) -> Result<(), PublishError> {
        let published = PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        };

        match self.sender.send(published) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Error types for event publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
}
