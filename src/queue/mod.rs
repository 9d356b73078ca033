// src/queue/mod.rs

//! The scheduler: a pure core plus a thin shell.
//!
//! - [`core`] is the deterministic state machine: partitions, the ready
//!   structure, suspension and the concurrency limit. It returns commands
//!   instead of performing effects, so it can be tested without a runtime.
//! - [`handle`] is the public [`OperationQueue`]: it serializes core access
//!   behind one mutex and executes the core's commands (dispatching to the
//!   worker backend, finishing cancelled operations) outside the lock.

pub mod core;
pub mod handle;

pub use self::core::{CoreCommand, CoreStep, QueueCore, QueueStats};
pub use handle::OperationQueue;

pub(crate) use handle::QueueShared;
