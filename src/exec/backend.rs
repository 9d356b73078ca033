// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The queue shell hands freshly-Executing operations to a `WorkerBackend`
//! instead of spawning directly. This keeps the scheduler testable: tests
//! swap in a fake backend that records dispatches and drives completion by
//! hand, while [`TokioWorkerBackend`] is the production implementation.
//!
//! Completion never flows through the backend: every operation reports back
//! by finishing (work-function return for synchronous operations, an
//! explicit [`Operation::finish`] call for asynchronous ones), which is
//! what releases its slot.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::anyhow;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::errors::{ConstructionError, Result};
use crate::op::operation::Work;
use crate::op::{AsyncWork, Operation, SyncWork};

/// Trait abstracting how dispatched operations are executed.
///
/// `dispatch` is called outside any engine lock, potentially from worker
/// completion paths on arbitrary threads, and must not block: spawn the
/// actual execution.
pub trait WorkerBackend: Send + Sync {
    fn dispatch(&self, ops: Vec<Operation>);
}

/// Production backend: synchronous work runs on `spawn_blocking` (it may
/// block its thread for the full duration), asynchronous initiators run on
/// a regular spawned task.
pub struct TokioWorkerBackend {
    handle: Handle,
}

impl TokioWorkerBackend {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Capture the current runtime's handle.
    pub fn from_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| ConstructionError::NoRuntime(e.to_string()))
    }
}

impl WorkerBackend for TokioWorkerBackend {
    fn dispatch(&self, ops: Vec<Operation>) {
        for op in ops {
            let Some(work) = op.take_work() else {
                // Only reachable if an operation is dispatched twice, which
                // the core's state transitions rule out.
                warn!(op = %op.id(), "dispatched operation has no work to run");
                continue;
            };

            match work {
                Work::Sync(work) => {
                    self.handle.spawn_blocking(move || run_sync_work(op, work));
                }
                Work::Asynchronous(init) => {
                    self.handle.spawn(async move { run_async_init(op, init) });
                }
            }
        }
    }
}

fn run_sync_work(op: Operation, work: SyncWork) {
    // A cancel that raced dispatch: honour it before doing any work.
    if op.is_cancelled() {
        debug!(op = %op.id(), "operation cancelled before its work ran; finishing");
        op.finish_without_executing();
        return;
    }

    let outcome = match catch_unwind(AssertUnwindSafe(|| work(&op))) {
        Ok(outcome) => outcome,
        Err(panic) => Err(anyhow!(
            "work function panicked: {}",
            panic_message(panic.as_ref())
        )),
    };
    op.finish(outcome);
}

fn run_async_init(op: Operation, init: AsyncWork) {
    if op.is_cancelled() {
        debug!(op = %op.id(), "operation cancelled before its work ran; finishing");
        op.finish_without_executing();
        return;
    }

    let probe = op.clone();
    if let Err(panic) = catch_unwind(AssertUnwindSafe(move || init(op))) {
        // The initiator died before it could arrange completion; finish on
        // its behalf so the slot is not wedged. If it had already finished,
        // the first outcome stands.
        probe.finish(Err(anyhow!(
            "work function panicked: {}",
            panic_message(panic.as_ref())
        )));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
