// src/lib.rs

//! opdag: an in-process operation scheduling engine.
//!
//! Callers construct [`Operation`]s around arbitrary work closures, wire
//! "must finish before" dependencies between them, and submit them to an
//! [`OperationQueue`]. The queue:
//!
//! - orders simultaneously-Ready operations by priority, with submission
//!   order breaking ties,
//! - gates each operation until every dependency has finished (a cancelled
//!   dependency counts as finished, so cancellation never wedges
//!   dependents),
//! - bounds how many operations execute concurrently, and
//! - delivers cooperative cancellation: a signal plus an optional hook,
//!   never forced preemption.
//!
//! Synchronous operations occupy their worker slot until the work closure
//! returns; asynchronous operations occupy it until someone calls
//! [`Operation::finish`], which may happen long after the initiator
//! returned. Completion callbacks fire exactly once, in registration
//! order, after the operation reaches `Finished`.
//!
//! The engine performs no IO of its own and holds no global state; queues
//! are plain values constructed and passed around by the caller.

pub mod dag;
pub mod errors;
pub mod exec;
pub mod op;
pub mod queue;
pub mod types;

pub use errors::{ConstructionError, Result};
pub use exec::{TokioWorkerBackend, WorkerBackend};
pub use op::{output, OpId, OpOutput, OpState, Operation, OperationBuilder, WorkOutcome};
pub use queue::{OperationQueue, QueueStats};
pub use types::{Concurrency, Priority, QueueOptions};
