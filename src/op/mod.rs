// src/op/mod.rs

//! Operations: units of work with their own state machine.
//!
//! - [`operation`] holds the `Operation` handle, its builder, cancellation
//!   and completion plumbing.
//! - [`state`] defines the monotonic lifecycle states.

pub mod operation;
pub mod state;

pub use operation::{
    output, AsyncWork, OpId, OpOutput, Operation, OperationBuilder, SyncWork, WorkOutcome,
};
pub use state::OpState;
