//! Fake worker backends for driving the queue without a runtime.

use std::sync::{Arc, Mutex};

use opdag::exec::WorkerBackend;
use opdag::Operation;

/// Shared record of dispatched operations, in dispatch order.
pub type Dispatched = Arc<Mutex<Vec<Operation>>>;

/// A fake backend that:
/// - records the order in which operations were dispatched
/// - immediately finishes each one, without running its work.
///
/// Because everything happens synchronously on the dispatching thread,
/// whole dependency chains resolve inside a single `add_operations` or
/// `set_suspended(false)` call.
pub struct RecordingBackend {
    dispatched: Dispatched,
}

impl RecordingBackend {
    pub fn new() -> (Self, Dispatched) {
        let dispatched: Dispatched = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                dispatched: Arc::clone(&dispatched),
            },
            dispatched,
        )
    }
}

impl WorkerBackend for RecordingBackend {
    fn dispatch(&self, ops: Vec<Operation>) {
        for op in ops {
            self.dispatched.lock().unwrap().push(op.clone());
            op.finish(Ok(None));
        }
    }
}

/// A fake backend that records dispatched operations and leaves them
/// Executing; the test finishes them itself via `Operation::finish`.
pub struct ManualBackend {
    started: Dispatched,
}

impl ManualBackend {
    pub fn new() -> (Self, Dispatched) {
        let started: Dispatched = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                started: Arc::clone(&started),
            },
            started,
        )
    }
}

impl WorkerBackend for ManualBackend {
    fn dispatch(&self, ops: Vec<Operation>) {
        let mut started = self.started.lock().unwrap();
        for op in ops {
            started.push(op);
        }
    }
}

/// Ids of the recorded operations, in dispatch order.
pub fn dispatched_ids(record: &Dispatched) -> Vec<opdag::OpId> {
    record.lock().unwrap().iter().map(Operation::id).collect()
}
