#![allow(dead_code)]

//! Operation construction helpers for tests.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use opdag::{output, Operation, OperationBuilder, Priority};

/// Shared log of work-function invocations, in execution order.
pub type RunLog = Arc<Mutex<Vec<String>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Synchronous operation that appends `name` to `log` when its work runs.
pub fn recording_op(name: &str, log: &RunLog) -> Operation {
    recording_op_with_priority(name, Priority::Normal, log)
}

/// Same, with an explicit priority.
pub fn recording_op_with_priority(name: &str, priority: Priority, log: &RunLog) -> Operation {
    let name = name.to_string();
    let log = Arc::clone(log);
    OperationBuilder::sync(move |_op| {
        log.lock().unwrap().push(name);
        Ok(None)
    })
    .priority(priority)
    .build()
}

/// Synchronous operation whose work does nothing.
pub fn noop_op() -> Operation {
    Operation::sync(|_op| Ok(None))
}

/// No-op operation with an explicit priority.
pub fn noop_op_with_priority(priority: Priority) -> Operation {
    OperationBuilder::sync(|_op| Ok(None)).priority(priority).build()
}

/// Synchronous operation producing the given value as its result.
pub fn value_op<T: std::any::Any + Send + Sync>(value: T) -> Operation {
    Operation::sync(move |_op| Ok(Some(output(value))))
}

/// Synchronous operation whose work fails with the given message.
pub fn failing_op(message: &'static str) -> Operation {
    Operation::sync(move |_op| Err(anyhow!(message)))
}
