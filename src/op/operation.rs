// src/op/operation.rs

//! The `Operation` handle: a unit of work with its own state machine,
//! priority, dependency set and completion notification.
//!
//! An `Operation` is a cheap cloneable handle (`Arc` inside). Hot state
//! (lifecycle state, cancellation flag) lives in atomics; cold state (work
//! function, dependency handles, result/error slots, callbacks) lives
//! behind a short-lived mutex. User code (work functions, completion
//! callbacks, cancel hooks) never runs while any engine lock is held.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::{ConstructionError, Result};
use crate::op::state::OpState;
use crate::queue::QueueShared;
use crate::types::Priority;

/// Unique operation identifier, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

impl OpId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        OpId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Type-erased value produced by a work function.
///
/// Stored behind `Arc` so dependents and callbacks can all read it; callers
/// downcast with `Any`.
pub type OpOutput = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an operation output.
pub fn output<T: Any + Send + Sync>(value: T) -> OpOutput {
    Arc::new(value)
}

/// What a work function produced: an optional output value, or an error.
///
/// Errors land in the operation's error slot; they are never propagated to
/// the queue and never cancel siblings or dependents.
pub type WorkOutcome = std::result::Result<Option<OpOutput>, anyhow::Error>;

/// Work function of a synchronous operation. Runs to completion on a worker
/// slot; the operation finishes when it returns.
pub type SyncWork = Box<dyn FnOnce(&Operation) -> WorkOutcome + Send>;

/// Initiator of an asynchronous operation. Expected to start some external
/// activity and return quickly; the operation (and its worker slot) stays
/// live until someone calls [`Operation::finish`].
pub type AsyncWork = Box<dyn FnOnce(Operation) + Send>;

pub(crate) enum Work {
    Sync(SyncWork),
    Asynchronous(AsyncWork),
}

type FinishCallback = Box<dyn FnOnce(&Operation) + Send>;
type CancelHook = Box<dyn FnOnce(&Operation) + Send>;

struct OpInner {
    work: Option<Work>,
    deps: Vec<Operation>,
    result: Option<OpOutput>,
    error: Option<Arc<anyhow::Error>>,
    finish_callbacks: Vec<FinishCallback>,
    cancel_hook: Option<CancelHook>,
}

struct OpShared {
    id: OpId,
    priority: Priority,
    asynchronous: bool,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    inner: Mutex<OpInner>,
    finished_tx: watch::Sender<bool>,
    /// Set once at submission; the owning queue outlives the interesting
    /// part of the operation's life, but only a weak link is kept.
    queue: OnceLock<Weak<QueueShared>>,
}

/// A unit of work with an explicit state machine.
///
/// Construct with [`Operation::sync`], [`Operation::asynchronous`] or
/// [`OperationBuilder`], wire dependencies with
/// [`add_dependency`](Operation::add_dependency), then submit to an
/// [`OperationQueue`](crate::queue::OperationQueue).
#[derive(Clone)]
pub struct Operation {
    shared: Arc<OpShared>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Operation`].
pub struct OperationBuilder {
    priority: Priority,
    asynchronous: bool,
    work: Work,
}

impl OperationBuilder {
    /// A synchronous operation: the work function runs to completion on a
    /// worker slot and the operation finishes when it returns.
    pub fn sync<F>(work: F) -> Self
    where
        F: FnOnce(&Operation) -> WorkOutcome + Send + 'static,
    {
        Self {
            priority: Priority::default(),
            asynchronous: false,
            work: Work::Sync(Box::new(work)),
        }
    }

    /// An asynchronous operation: the initiator starts work and returns;
    /// the worker slot stays occupied until [`Operation::finish`] is
    /// called, possibly much later and from another thread.
    pub fn asynchronous<F>(init: F) -> Self
    where
        F: FnOnce(Operation) + Send + 'static,
    {
        Self {
            priority: Priority::default(),
            asynchronous: true,
            work: Work::Asynchronous(Box::new(init)),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn build(self) -> Operation {
        let (finished_tx, _) = watch::channel(false);
        Operation {
            shared: Arc::new(OpShared {
                id: OpId::next(),
                priority: self.priority,
                asynchronous: self.asynchronous,
                state: AtomicU8::new(OpState::Pending.as_u8()),
                cancel_requested: AtomicBool::new(false),
                inner: Mutex::new(OpInner {
                    work: Some(self.work),
                    deps: Vec::new(),
                    result: None,
                    error: None,
                    finish_callbacks: Vec::new(),
                    cancel_hook: None,
                }),
                finished_tx,
                queue: OnceLock::new(),
            }),
        }
    }
}

impl Operation {
    /// Shorthand for a normal-priority synchronous operation.
    pub fn sync<F>(work: F) -> Self
    where
        F: FnOnce(&Operation) -> WorkOutcome + Send + 'static,
    {
        OperationBuilder::sync(work).build()
    }

    /// Shorthand for a normal-priority asynchronous operation.
    pub fn asynchronous<F>(init: F) -> Self
    where
        F: FnOnce(Operation) + Send + 'static,
    {
        OperationBuilder::asynchronous(init).build()
    }

    pub fn id(&self) -> OpId {
        self.shared.id
    }

    pub fn priority(&self) -> Priority {
        self.shared.priority
    }

    pub fn is_asynchronous(&self) -> bool {
        self.shared.asynchronous
    }

    pub fn state(&self) -> OpState {
        OpState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether cancellation has been requested. Advisory: long-running work
    /// functions should poll this and wind down when it flips.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::Acquire)
    }

    /// The value produced by the work function, once finished.
    ///
    /// `None` until the operation is finished, and `None` afterwards for
    /// operations that produced no value (cancelled-before-dispatch
    /// operations always read `None`).
    pub fn result(&self) -> Option<OpOutput> {
        if !self.is_finished() {
            return None;
        }
        self.shared.inner.lock().result.clone()
    }

    /// The error captured from the work function, once finished.
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        if !self.is_finished() {
            return None;
        }
        self.shared.inner.lock().error.clone()
    }

    /// Ids of this operation's direct dependencies.
    pub fn dependency_ids(&self) -> Vec<OpId> {
        self.shared.inner.lock().deps.iter().map(Operation::id).collect()
    }

    pub(crate) fn dependency_handles(&self) -> Vec<Operation> {
        self.shared.inner.lock().deps.clone()
    }

    /// Declare that this operation must not start before `dep` has finished.
    ///
    /// Fails when the edge would close a cycle, when either operation has
    /// already been scheduled for execution or has finished, or (for a
    /// submitted operation) when `dep` is not queued on the same queue.
    pub fn add_dependency(&self, dep: &Operation) -> Result<()> {
        if dep.id() == self.id() {
            return Err(ConstructionError::DependencyCycle(self.id()));
        }
        match self.state() {
            OpState::Pending => {}
            OpState::Ready | OpState::Executing => {
                return Err(ConstructionError::AlreadyStarted(self.id()));
            }
            OpState::Finished => return Err(ConstructionError::AlreadyFinished(self.id())),
        }
        match dep.state() {
            OpState::Pending | OpState::Ready => {}
            OpState::Executing => return Err(ConstructionError::AlreadyStarted(dep.id())),
            OpState::Finished => return Err(ConstructionError::AlreadyFinished(dep.id())),
        }
        if dep.transitively_depends_on(self.id()) {
            return Err(ConstructionError::DependencyCycle(self.id()));
        }

        // For a submitted operation the owning queue re-validates under its
        // lock and records the edge in its graph.
        if let Some(queue) = self.queue() {
            queue.add_dependency_edge(self, dep)?;
        }

        self.shared.inner.lock().deps.push(dep.clone());
        debug!(op = %self.id(), dep = %dep.id(), "dependency added");
        Ok(())
    }

    /// Depth-first walk over dependency handles looking for `target`.
    fn transitively_depends_on(&self, target: OpId) -> bool {
        let mut stack = vec![self.clone()];
        let mut visited: HashSet<OpId> = HashSet::new();

        while let Some(op) = stack.pop() {
            if op.id() == target {
                return true;
            }
            if !visited.insert(op.id()) {
                continue;
            }
            stack.extend(op.shared.inner.lock().deps.iter().cloned());
        }

        false
    }

    /// Register a completion callback.
    ///
    /// Callbacks fire exactly once, in registration order, strictly after
    /// the operation reaches Finished, on whichever thread delivered the
    /// finish. Registering on an already-finished operation fires the
    /// callback immediately on the calling thread.
    pub fn on_finished<F>(&self, callback: F)
    where
        F: FnOnce(&Operation) + Send + 'static,
    {
        let mut callback: Option<FinishCallback> = Some(Box::new(callback));
        {
            let mut inner = self.shared.inner.lock();
            if self.state() != OpState::Finished {
                if let Some(callback) = callback.take() {
                    inner.finish_callbacks.push(callback);
                }
            }
        }
        if let Some(callback) = callback {
            debug!(op = %self.id(), "completion callback registered after finish; firing now");
            callback(self);
        }
    }

    /// Install the cancellation hook, invoked once at the moment
    /// cancellation is first requested. Last registration wins. If
    /// cancellation was already requested the hook fires immediately.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce(&Operation) + Send + 'static,
    {
        let mut hook: Option<CancelHook> = Some(Box::new(hook));
        {
            let mut inner = self.shared.inner.lock();
            if !self.is_cancelled() {
                inner.cancel_hook = hook.take();
            }
        }
        if let Some(hook) = hook {
            if !self.is_finished() {
                hook(self);
            }
        }
    }

    /// Request cancellation. Idempotent, never blocks, a no-op after the
    /// operation has finished.
    ///
    /// For an operation that has not been dispatched yet this finishes it
    /// immediately with the work function never invoked. For an executing
    /// operation it only delivers the signal; completion remains the work
    /// function's responsibility.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        if self.shared.cancel_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(op = %self.id(), state = %self.state(), "cancellation requested");

        let hook = self.shared.inner.lock().cancel_hook.take();
        if let Some(hook) = hook {
            hook(self);
        }

        match self.queue() {
            Some(queue) => queue.operation_cancelled(self.id()),
            None => {
                // Never submitted: nothing will ever dispatch it, so finish
                // right away and unblock any waiters or dependents.
                if self.state() < OpState::Executing {
                    self.finish_without_executing();
                }
            }
        }
    }

    /// Signal completion of an asynchronous operation.
    ///
    /// Stores the outcome into the result/error slots, transitions to
    /// Finished, fires completion callbacks and releases the worker slot.
    /// Calling this twice keeps the first outcome; synchronous operations
    /// finish on work-function return and do not need it.
    pub fn finish(&self, outcome: WorkOutcome) {
        self.finish_impl(Some(outcome));
    }

    /// Finish without ever having executed (cancellation before dispatch).
    ///
    /// Returns `false` when a racing finish already won.
    pub(crate) fn finish_without_executing(&self) -> bool {
        self.finish_impl(None)
    }

    fn finish_impl(&self, outcome: Option<WorkOutcome>) -> bool {
        let callbacks = {
            let mut inner = self.shared.inner.lock();
            if self.state() == OpState::Finished {
                debug!(op = %self.id(), "finish on an already-finished operation; keeping first outcome");
                return false;
            }
            if self.state() != OpState::Executing && !self.is_cancelled() {
                warn!(
                    op = %self.id(),
                    state = %self.state(),
                    "finish before dispatch on a non-cancelled operation"
                );
            }
            match outcome {
                Some(Ok(value)) => inner.result = value,
                Some(Err(error)) => inner.error = Some(Arc::new(error)),
                None => {}
            }
            // Drop undispatched work so cancelled operations free their
            // closures (and anything captured) promptly.
            inner.work = None;
            self.shared.state.store(OpState::Finished.as_u8(), Ordering::Release);
            std::mem::take(&mut inner.finish_callbacks)
        };

        self.shared.finished_tx.send_replace(true);
        debug!(
            op = %self.id(),
            cancelled = self.is_cancelled(),
            "operation finished"
        );

        for callback in callbacks {
            callback(self);
        }

        if let Some(queue) = self.queue() {
            queue.operation_finished(self.id());
        }
        true
    }

    /// Wait until the operation reaches Finished.
    pub async fn wait(&self) {
        if self.is_finished() {
            return;
        }
        let mut rx = self.shared.finished_tx.subscribe();
        // The sender lives inside self, so this cannot error while we hold
        // a handle; a lagging receiver just sees the final value.
        let _ = rx.wait_for(|finished| *finished).await;
    }

    // --- queue-facing internals -------------------------------------------

    pub(crate) fn is_queued(&self) -> bool {
        self.shared.queue.get().is_some()
    }

    pub(crate) fn attach_queue(&self, queue: &Arc<QueueShared>) -> Result<()> {
        if self.shared.queue.set(Arc::downgrade(queue)).is_err() {
            return Err(ConstructionError::AlreadyQueued(self.id()));
        }
        Ok(())
    }

    fn queue(&self) -> Option<Arc<QueueShared>> {
        self.shared.queue.get().and_then(Weak::upgrade)
    }

    /// Pending -> Ready, if still Pending. Compare-and-swap so a racing
    /// finish can never be regressed.
    pub(crate) fn promote_ready(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                OpState::Pending.as_u8(),
                OpState::Ready.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Ready -> Executing, if still Ready.
    pub(crate) fn begin_executing(&self) -> bool {
        self.shared
            .state
            .compare_exchange(
                OpState::Ready.as_u8(),
                OpState::Executing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn take_work(&self) -> Option<Work> {
        self.shared.inner.lock().work.take()
    }
}
