// src/queue/handle.rs

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::Result;
use crate::exec::{TokioWorkerBackend, WorkerBackend};
use crate::op::{OpId, Operation, WorkOutcome};
use crate::queue::core::{CoreCommand, CoreStep, QueueCore, QueueStats};
use crate::types::{Concurrency, QueueOptions};

/// Shared state behind every clone of an [`OperationQueue`], and the target
/// of the weak back-link each submitted operation carries.
///
/// All scheduler state mutates under the single core mutex; commands a core
/// step produces are executed strictly after that lock is released, so work
/// functions, callbacks and backend code never run under it.
pub(crate) struct QueueShared {
    core: Mutex<QueueCore>,
    backend: Box<dyn WorkerBackend>,
}

impl QueueShared {
    pub(crate) fn operation_finished(self: &Arc<Self>, id: OpId) {
        let step = self.core.lock().on_finished(id);
        self.run_step(step);
    }

    pub(crate) fn operation_cancelled(self: &Arc<Self>, id: OpId) {
        let step = self.core.lock().on_cancelled(id);
        self.run_step(step);
    }

    pub(crate) fn add_dependency_edge(&self, dependent: &Operation, dep: &Operation) -> Result<()> {
        self.core.lock().add_edge(dependent, dep)
    }

    fn run_step(self: &Arc<Self>, step: CoreStep) {
        for command in step.commands {
            match command {
                CoreCommand::Dispatch(ops) => {
                    debug!(count = ops.len(), "handing operations to the worker backend");
                    self.backend.dispatch(ops);
                }
                CoreCommand::FinishCancelled(op) => {
                    if !op.finish_without_executing() {
                        // A racing finish won before the operation was
                        // attached; make sure the core forgets it.
                        self.operation_finished(op.id());
                    }
                }
            }
        }
    }
}

/// A scheduler for [`Operation`]s: orders Ready operations by priority,
/// gates them on dependencies and suspension, and bounds how many execute
/// concurrently.
///
/// Cloning is cheap and clones address the same queue.
#[derive(Clone)]
pub struct OperationQueue {
    shared: Arc<QueueShared>,
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("core", &self.shared.core.lock())
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    /// Create a queue backed by the tokio worker backend.
    ///
    /// Must be called from within a tokio runtime (the backend captures the
    /// current handle); fails with `NoRuntime` otherwise.
    pub fn new(options: QueueOptions) -> Result<Self> {
        let backend = TokioWorkerBackend::from_current()?;
        Self::with_backend(options, backend)
    }

    /// Create a queue with a caller-supplied worker backend.
    pub fn with_backend(
        options: QueueOptions,
        backend: impl WorkerBackend + 'static,
    ) -> Result<Self> {
        let core = QueueCore::new(&options)?;
        Ok(Self {
            shared: Arc::new(QueueShared {
                core: Mutex::new(core),
                backend: Box::new(backend),
            }),
        })
    }

    /// Submit a single operation.
    pub fn add_operation(&self, op: &Operation) -> Result<()> {
        self.add_operations(std::slice::from_ref(op))
    }

    /// Submit a batch of operations.
    ///
    /// The whole batch is validated before anything is registered, so a
    /// rejected batch leaves the queue untouched. Operations in the batch
    /// may depend on each other in any slice order.
    pub fn add_operations(&self, ops: &[Operation]) -> Result<()> {
        let step = {
            let mut core = self.shared.core.lock();
            core.validate_batch(ops)?;
            for op in ops {
                op.attach_queue(&self.shared)?;
            }
            core.register_batch(ops)
        };
        self.shared.run_step(step);
        Ok(())
    }

    /// Submit a batch and wait until every operation in it has finished.
    ///
    /// Only the listed operations are awaited; dispatch of unrelated
    /// operations is unaffected while waiting.
    pub async fn add_operations_and_wait(&self, ops: &[Operation]) -> Result<()> {
        self.add_operations(ops)?;
        for op in ops {
            op.wait().await;
        }
        Ok(())
    }

    /// Wrap a bare work function into an anonymous synchronous operation of
    /// normal priority and submit it.
    pub fn add_work<F>(&self, work: F) -> Result<Operation>
    where
        F: FnOnce(&Operation) -> WorkOutcome + Send + 'static,
    {
        let op = Operation::sync(work);
        self.add_operation(&op)?;
        Ok(op)
    }

    /// While suspended no new dispatch occurs; already-executing operations
    /// continue and finish normally.
    pub fn set_suspended(&self, suspended: bool) {
        let step = self.shared.core.lock().set_suspended(suspended);
        self.shared.run_step(step);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.core.lock().is_suspended()
    }

    /// Change the concurrency limit. Affects future dispatch only.
    pub fn set_max_concurrent(&self, limit: Concurrency) -> Result<()> {
        let step = self.shared.core.lock().set_max_concurrent(limit)?;
        self.shared.run_step(step);
        Ok(())
    }

    pub fn max_concurrent(&self) -> Concurrency {
        self.shared.core.lock().max_concurrent()
    }

    /// Occupancy snapshot for diagnostics and stall detection.
    pub fn stats(&self) -> QueueStats {
        self.shared.core.lock().stats()
    }
}
