//! Batch state machine: phases, per-batch state, and the event fold.
//!
//! The coordinator drives these transitions live; crash recovery replays the
//! same durable events through the same fold, so both paths converge on
//! identical state.

pub mod batch_state;
pub mod states;

pub use batch_state::BatchState;
pub use states::BatchPhase;
