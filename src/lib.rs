#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Batcher Core
//!
//! Batch command coordination core: given a caller-submitted set of commands
//! that must execute as one logical unit against a distributed
//! command-processing fabric, this crate validates the whole set before
//! committing to it, durably records that the batch started, dispatches
//! every command exactly once for real execution, collects every outcome
//! without aborting on individual command failure, durably records
//! completion, and self-terminates after a grace period while rejecting
//! duplicate concurrent submissions for the same batch identity.
//!
//! ## Architecture
//!
//! A process-wide [`actors::BatchSupervisor`] routes each execute-batch
//! request to the [`actors::BatchCoordinator`] for its identity, creating
//! the instance on first reference. Each coordinator is a single sequential
//! state machine persisting append-only events to a per-entity durable log
//! and announcing milestones on a best-effort event bus, which the
//! supervisor also observes to keep its active set synchronized. Both actor
//! kinds replay their journal entity on restart, so the whole population
//! survives a crash with correct state.
//!
//! External collaborators are abstracted at their interface boundary: the
//! command forwarder ([`forwarder::CommandForwarder`]), the durable entity
//! log ([`journal::EntityJournal`]), and the event bus
//! ([`events::EventPublisher`]).
//!
//! ## Module Organization
//!
//! - [`actors`] - supervisor and per-batch coordinator state machines
//! - [`state_machine`] - batch phases and the durable-event fold
//! - [`journal`] - durable entity log boundary and in-memory implementation
//! - [`events`] - durable event shapes and the lifecycle event bus
//! - [`correlation`] - batch identities and reversible correlation ids
//! - [`messages`] - request/response and outcome types
//! - [`forwarder`] - command-processing fabric boundary
//! - [`config`] - explicit configuration structs
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batcher_core::actors::BatchSupervisor;
//! use batcher_core::config::BatcherConfig;
//! use batcher_core::context::CoordinationContext;
//! use batcher_core::journal::InMemoryJournal;
//! use batcher_core::messages::{BatchCommand, ExecuteBatchRequest};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     forwarder: Arc<dyn batcher_core::forwarder::CommandForwarder>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let context = CoordinationContext::new(
//!     forwarder,
//!     Arc::new(InMemoryJournal::new()),
//!     BatcherConfig::default(),
//! );
//! let supervisor = BatchSupervisor::spawn(context).await?;
//!
//! let request = ExecuteBatchRequest::new(
//!     None,
//!     vec![BatchCommand::new("order-1", serde_json::json!({"op": "create"}))],
//! );
//! let (batch_id, reply) = supervisor.execute_batch(request).await?;
//! let response = reply.await?;
//! println!("batch {batch_id}: {response:?}");
//! # Ok(())
//! # }
//! ```

pub mod actors;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod journal;
pub mod logging;
pub mod messages;
pub mod state_machine;

pub use actors::{BatchCoordinator, BatchSupervisor, SupervisorHandle};
pub use config::BatcherConfig;
pub use context::{CoordinationContext, CoordinationStats};
pub use correlation::{BatchId, InternalCorrelationId};
pub use error::{BatcherError, BatcherResult};
pub use events::{BatchEvent, EventPublisher, SupervisorEvent};
pub use forwarder::{CommandForwarder, OutcomeSink};
pub use journal::{EntityJournal, InMemoryJournal, JournalEvent};
pub use messages::{
    BatchCommand, CommandOutcome, DeliveredOutcome, ExecuteBatchRequest, ExecuteBatchResponse,
};
pub use state_machine::{BatchPhase, BatchState};
