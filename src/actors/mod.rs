//! # Coordination Actors
//!
//! The dynamic actor population at the core of batch coordination: one
//! process-wide [`BatchSupervisor`] routing to many per-batch
//! [`BatchCoordinator`] instances, created lazily and dropped on
//! self-shutdown.

pub mod batch_coordinator;
pub mod supervisor;
pub mod traits;

pub use batch_coordinator::{BatchCoordinator, CoordinatorHandle, CoordinatorMessage, StopReason};
pub use supervisor::{BatchSupervisor, SupervisorHandle, SUPERVISOR_ENTITY};
pub use traits::CoordinationActor;
