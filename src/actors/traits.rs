//! # Core Actor Traits
//!
//! Foundation for the lightweight actor pattern used by the coordination
//! core. Each actor is a single sequential state machine: it processes one
//! inbound message at a time off a tokio mpsc mailbox and never needs
//! internal locks, because no other logical thread of control mutates its
//! state.

use crate::context::CoordinationContext;
use crate::error::BatcherResult;
use std::sync::Arc;

/// Base trait for coordination actors.
///
/// Provides the naming and lifecycle hooks shared by the supervisor and the
/// per-batch coordinators without requiring a full actor framework.
pub trait CoordinationActor: Send + 'static {
    /// Actor name for logging.
    fn name(&self) -> &'static str;

    /// Access to shared system context.
    fn context(&self) -> &Arc<CoordinationContext>;

    /// Called when the actor is started (optional).
    ///
    /// # Errors
    ///
    /// Return an error if startup fails; the error is propagated to the
    /// caller and the actor is not spawned.
    fn started(&mut self) -> BatcherResult<()> {
        Ok(())
    }

    /// Called when the actor is stopping (optional).
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller but do not prevent shutdown.
    fn stopped(&mut self) -> BatcherResult<()> {
        Ok(())
    }
}
