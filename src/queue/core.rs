// src/queue/core.rs

//! Pure scheduler core.
//!
//! `QueueCore` is a synchronous, deterministic state machine with no
//! channels, no tokio types and no IO. Step methods mutate the partitions
//! and return [`CoreCommand`]s describing what the shell should do next:
//! dispatch freshly-Executing operations to the worker backend, or finish
//! a cancelled operation that never needs to execute. The shell
//! ([`OperationQueue`](crate::queue::OperationQueue)) executes commands
//! only after releasing its lock, so user code never runs under it.
//!
//! The core is intended to be extensively testable without any runtime;
//! the property tests drive it directly.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::DepGraph;
use crate::errors::{ConstructionError, Result};
use crate::op::{OpId, OpState, Operation};
use crate::types::{Concurrency, Priority, QueueOptions};

/// Command produced by the core, to be executed by the shell outside the
/// queue lock.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these freshly-Executing operations to the worker backend.
    Dispatch(Vec<Operation>),
    /// Finish this operation without executing it (cancelled before
    /// dispatch). Firing its callbacks must not happen under the lock.
    FinishCancelled(Operation),
}

/// Result of a single core step.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
}

impl CoreStep {
    fn none() -> Self {
        Self::default()
    }
}

/// Entry in the ready structure: highest priority first, submission
/// sequence as the tie-break (first submitted, first dispatched).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    id: OpId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Snapshot of queue occupancy for diagnostics.
///
/// `oldest_executing_age` is the stall instrument: an asynchronous
/// operation whose work never signals completion shows up as an
/// ever-growing age here.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: usize,
    pub ready: usize,
    pub executing: usize,
    pub finished: u64,
    pub suspended: bool,
    pub max_concurrent: Concurrency,
    pub oldest_executing_age: Option<Duration>,
}

/// Pure scheduler state: partitions of submitted operations, the ready
/// structure, the dependency graph, suspension and the concurrency limit.
#[derive(Debug)]
pub struct QueueCore {
    /// Live (unfinished) operations owned by this queue.
    ops: HashMap<OpId, Operation>,
    /// Submission sequence per live operation (dispatch tie-break).
    seqs: HashMap<OpId, u64>,
    graph: DepGraph,
    ready: BinaryHeap<ReadyEntry>,
    /// Executing operations with their dispatch instant.
    executing: HashMap<OpId, Instant>,
    suspended: bool,
    max_concurrent: Concurrency,
    next_seq: u64,
    finished_total: u64,
}

impl QueueCore {
    pub fn new(options: &QueueOptions) -> Result<Self> {
        options.max_concurrent.validate()?;
        Ok(Self {
            ops: HashMap::new(),
            seqs: HashMap::new(),
            graph: DepGraph::new(),
            ready: BinaryHeap::new(),
            executing: HashMap::new(),
            suspended: options.suspended,
            max_concurrent: options.max_concurrent,
            next_seq: 0,
            finished_total: 0,
        })
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn max_concurrent(&self) -> Concurrency {
        self.max_concurrent
    }

    /// Validate a batch without mutating anything.
    ///
    /// Checks: no operation already queued or finished, no duplicates
    /// within the batch, every unfinished dependency queued here or part of
    /// the batch, and the graph stays acyclic with the batch's edges added.
    pub fn validate_batch(&self, ops: &[Operation]) -> Result<()> {
        let mut batch_ids: HashSet<OpId> = HashSet::new();

        for op in ops {
            if op.is_queued() {
                return Err(ConstructionError::AlreadyQueued(op.id()));
            }
            if op.is_finished() {
                return Err(ConstructionError::AlreadyFinished(op.id()));
            }
            if !batch_ids.insert(op.id()) {
                return Err(ConstructionError::AlreadyQueued(op.id()));
            }
        }

        let mut extra_nodes = Vec::new();
        let mut extra_edges = Vec::new();

        for op in ops {
            extra_nodes.push(op.id());
            for dep in op.dependency_handles() {
                if dep.is_finished() {
                    continue;
                }
                if !self.ops.contains_key(&dep.id()) && !batch_ids.contains(&dep.id()) {
                    return Err(ConstructionError::ForeignDependency {
                        op: op.id(),
                        dep: dep.id(),
                    });
                }
                extra_edges.push((dep.id(), op.id()));
            }
        }

        self.graph
            .validate_with(&extra_nodes, &extra_edges)
            .map_err(ConstructionError::DependencyCycle)?;

        Ok(())
    }

    /// Register a validated batch: assign sequences, record graph edges,
    /// compute initial readiness and run a dispatch pass.
    ///
    /// Infallible; callers must run [`validate_batch`](Self::validate_batch)
    /// first (the shell does both under one lock acquisition).
    pub fn register_batch(&mut self, ops: &[Operation]) -> CoreStep {
        let mut step = CoreStep::none();

        // A cancel can race submission and finish an operation between
        // validation and here; such operations are simply not registered.
        let live: Vec<&Operation> = ops
            .iter()
            .filter(|op| {
                if op.is_finished() {
                    debug!(op = %op.id(), "operation finished while being submitted; not registering");
                    false
                } else {
                    true
                }
            })
            .collect();

        for op in &live {
            let id = op.id();
            let seq = self.next_seq;
            self.next_seq += 1;
            self.seqs.insert(id, seq);
            self.ops.insert(id, (*op).clone());
            self.graph.add_node(id);
            debug!(op = %id, seq, priority = ?op.priority(), "operation submitted");
        }

        // Edges after all nodes exist, so intra-batch dependencies work
        // regardless of slice order.
        for op in &live {
            for dep in op.dependency_handles() {
                if dep.is_finished() {
                    continue;
                }
                self.graph.add_edge(dep.id(), op.id());
            }
        }

        for op in &live {
            if op.is_cancelled() {
                debug!(op = %op.id(), "submitted operation already cancelled; finishing without executing");
                step.commands.push(CoreCommand::FinishCancelled((*op).clone()));
                continue;
            }
            if self.graph.pending_count(op.id()) == 0 {
                self.promote(op.id());
            }
        }

        step.commands.extend(self.dispatch_pass());
        step
    }

    /// Convenience for manual drivers and tests: validate + register in one
    /// step. The shell uses the split form so it can attach the queue link
    /// between the two phases.
    pub fn submit_batch(&mut self, ops: &[Operation]) -> Result<CoreStep> {
        self.validate_batch(ops)?;
        Ok(self.register_batch(ops))
    }

    /// Add a dependency edge for an already-submitted operation.
    ///
    /// The authoritative re-validation of what `Operation::add_dependency`
    /// checked optimistically outside the lock.
    pub fn add_edge(&mut self, dependent: &Operation, dep: &Operation) -> Result<()> {
        if !self.ops.contains_key(&dependent.id()) {
            return Err(ConstructionError::ForeignDependency {
                op: dependent.id(),
                dep: dep.id(),
            });
        }
        if dependent.state() != OpState::Pending {
            return Err(ConstructionError::AlreadyStarted(dependent.id()));
        }
        if !self.ops.contains_key(&dep.id()) {
            // Either finished (and removed) or never submitted here.
            if dep.is_finished() {
                return Err(ConstructionError::AlreadyFinished(dep.id()));
            }
            return Err(ConstructionError::ForeignDependency {
                op: dependent.id(),
                dep: dep.id(),
            });
        }
        match dep.state() {
            OpState::Pending | OpState::Ready => {}
            OpState::Executing => return Err(ConstructionError::AlreadyStarted(dep.id())),
            OpState::Finished => return Err(ConstructionError::AlreadyFinished(dep.id())),
        }
        if self.graph.would_cycle(dep.id(), dependent.id()) {
            return Err(ConstructionError::DependencyCycle(dependent.id()));
        }

        self.graph.add_edge(dep.id(), dependent.id());
        Ok(())
    }

    /// Handle an operation having finished (normally, failed or cancelled;
    /// all the same to the scheduler): free its slot, recompute readiness
    /// of its dependents and try to fill freed capacity.
    pub fn on_finished(&mut self, id: OpId) -> CoreStep {
        let Some(op) = self.ops.remove(&id) else {
            warn!(op = %id, "completion for unknown operation; ignoring");
            return CoreStep::none();
        };

        self.seqs.remove(&id);
        self.executing.remove(&id);
        self.finished_total += 1;
        info!(
            op = %id,
            cancelled = op.is_cancelled(),
            failed = op.error().is_some(),
            "operation finished"
        );

        let newly_satisfied = self.graph.mark_finished(id);
        for dependent in newly_satisfied {
            self.promote(dependent);
        }

        let mut step = CoreStep::none();
        step.commands.extend(self.dispatch_pass());
        step
    }

    /// Handle a cancellation request for a submitted operation.
    ///
    /// Not-yet-dispatched operations finish immediately without executing;
    /// executing operations are left to wind down cooperatively.
    pub fn on_cancelled(&mut self, id: OpId) -> CoreStep {
        let Some(op) = self.ops.get(&id) else {
            debug!(op = %id, "cancel for unknown or already-finished operation; ignoring");
            return CoreStep::none();
        };

        match op.state() {
            OpState::Pending | OpState::Ready => {
                debug!(op = %id, "cancelled before dispatch; finishing without executing");
                CoreStep {
                    commands: vec![CoreCommand::FinishCancelled(op.clone())],
                }
            }
            OpState::Executing => {
                debug!(op = %id, "cancelled while executing; slot stays occupied until it finishes");
                CoreStep::none()
            }
            OpState::Finished => CoreStep::none(),
        }
    }

    /// Toggle suspension. Resuming runs a dispatch pass; suspending only
    /// affects future dispatch, never already-executing operations.
    pub fn set_suspended(&mut self, suspended: bool) -> CoreStep {
        if self.suspended == suspended {
            return CoreStep::none();
        }
        self.suspended = suspended;
        info!(suspended, "queue suspension changed");

        let mut step = CoreStep::none();
        if !suspended {
            step.commands.extend(self.dispatch_pass());
        }
        step
    }

    /// Change the concurrency limit. Takes effect for future dispatch only;
    /// lowering it below current occupancy never preempts running work.
    pub fn set_max_concurrent(&mut self, limit: Concurrency) -> Result<CoreStep> {
        limit.validate()?;
        self.max_concurrent = limit;
        info!(limit = ?limit, "concurrency limit changed");

        let mut step = CoreStep::none();
        step.commands.extend(self.dispatch_pass());
        Ok(step)
    }

    pub fn stats(&self) -> QueueStats {
        let mut pending = 0;
        let mut ready = 0;
        for op in self.ops.values() {
            match op.state() {
                OpState::Pending => pending += 1,
                OpState::Ready => ready += 1,
                OpState::Executing | OpState::Finished => {}
            }
        }

        QueueStats {
            pending,
            ready,
            executing: self.executing.len(),
            finished: self.finished_total,
            suspended: self.suspended,
            max_concurrent: self.max_concurrent,
            oldest_executing_age: self
                .executing
                .values()
                .min()
                .map(|started| started.elapsed()),
        }
    }

    /// Promote a pending operation whose dependencies are all finished.
    fn promote(&mut self, id: OpId) {
        let Some(op) = self.ops.get(&id) else {
            return;
        };
        if op.is_cancelled() {
            // A FinishCancelled command for it is already in flight.
            return;
        }
        if !op.promote_ready() {
            return;
        }
        let seq = self.seqs.get(&id).copied().unwrap_or(0);
        debug!(op = %id, "dependencies satisfied; marking Ready");
        self.ready.push(ReadyEntry {
            priority: op.priority(),
            seq,
            id,
        });
    }

    /// Fill free slots from the ready structure: highest priority first,
    /// submission order within a priority. Stale entries (operations that
    /// finished or were cancelled while Ready) are skipped lazily.
    fn dispatch_pass(&mut self) -> Option<CoreCommand> {
        if self.suspended {
            return None;
        }

        let mut batch = Vec::new();
        while self.max_concurrent.allows(self.executing.len()) {
            let Some(entry) = self.ready.pop() else {
                break;
            };
            let Some(op) = self.ops.get(&entry.id) else {
                continue;
            };
            if op.is_cancelled() {
                continue;
            }
            if !op.begin_executing() {
                continue;
            }
            self.executing.insert(entry.id, Instant::now());
            info!(
                op = %entry.id,
                priority = ?entry.priority,
                occupancy = self.executing.len(),
                "dispatching operation"
            );
            batch.push(op.clone());
        }

        if batch.is_empty() {
            None
        } else {
            Some(CoreCommand::Dispatch(batch))
        }
    }
}
