// tests/cancel_behaviour.rs

//! Cooperative cancellation: pre-dispatch cancels finish without ever
//! executing; mid-flight cancels deliver the hook and wait for the work to
//! wind down on its own.

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use opdag::{
    Concurrency, ConstructionError, OpState, Operation, OperationQueue, QueueOptions,
};
use opdag_test_utils::backends::{ManualBackend, RecordingBackend};
use opdag_test_utils::builders::noop_op;
use opdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn cancel_before_dispatch_never_runs_work() -> TestResult {
    init_tracing();

    let queue = OperationQueue::new(QueueOptions {
        max_concurrent: Concurrency::Bounded(2),
        suspended: true,
    })?;

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_work = Arc::clone(&ran);
    let op = Operation::sync(move |_op| {
        ran_in_work.store(true, Ordering::SeqCst);
        Ok(None)
    });

    queue.add_operation(&op)?;
    op.cancel();
    with_timeout(op.wait()).await;

    assert_eq!(op.state(), OpState::Finished);
    assert!(op.is_cancelled());
    assert!(!ran.load(Ordering::SeqCst));
    // Cancelled, not failed: the flag distinguishes the outcome, not the
    // error slot.
    assert!(op.error().is_none());
    assert!(op.result().is_none());

    queue.set_suspended(false);
    Ok(())
}

#[test]
fn cancel_hook_fires_once() {
    init_tracing();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = Arc::clone(&fired);

    let op = noop_op();
    op.on_cancel(move |_op| {
        fired_in_hook.fetch_add(1, Ordering::SeqCst);
    });

    op.cancel();
    op.cancel();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(op.is_finished());
    assert!(op.is_cancelled());
}

#[test]
fn hook_registered_after_cancel_fires_immediately() -> TestResult {
    init_tracing();

    let (backend, started) = ManualBackend::new();
    let queue = OperationQueue::with_backend(QueueOptions::default(), backend)?;

    let op = noop_op();
    queue.add_operation(&op)?;
    assert_eq!(started.lock().unwrap().len(), 1);
    op.cancel();
    assert_eq!(op.state(), OpState::Executing);

    // Cancellation already requested and the operation is still live: the
    // late hook fires on the registering thread.
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = Arc::clone(&fired);
    op.on_cancel(move |_op| {
        fired_in_hook.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    op.finish(Ok(None));
    Ok(())
}

#[test]
fn late_hook_on_finished_operation_does_not_fire() {
    init_tracing();

    let op = noop_op();
    op.cancel();
    assert!(op.is_finished());

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = Arc::clone(&fired);
    op.on_cancel(move |_op| {
        fired_in_hook.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_after_finish_is_a_noop() -> TestResult {
    init_tracing();

    let (backend, _dispatched) = RecordingBackend::new();
    let queue = OperationQueue::with_backend(QueueOptions::default(), backend)?;

    let op = noop_op();
    queue.add_operation(&op)?;
    assert!(op.is_finished());

    op.cancel();
    assert!(!op.is_cancelled());
    Ok(())
}

#[test]
fn cancelled_unsubmitted_operation_cannot_be_submitted() -> TestResult {
    init_tracing();

    let (backend, _dispatched) = RecordingBackend::new();
    let queue = OperationQueue::with_backend(QueueOptions::default(), backend)?;

    let op = noop_op();
    op.cancel();
    assert!(op.is_finished());

    let err = queue.add_operation(&op).unwrap_err();
    assert!(matches!(err, ConstructionError::AlreadyFinished(_)));
    Ok(())
}

#[tokio::test]
async fn cancel_mid_flight_releases_slot_only_on_finish() -> TestResult {
    init_tracing();

    let queue = OperationQueue::new(QueueOptions {
        max_concurrent: Concurrency::Bounded(1),
        suspended: false,
    })?;

    // Asynchronous operation: the initiator reports that it started, then
    // returns with the slot still occupied.
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let op = Operation::asynchronous(move |_op| {
        let _ = started_tx.send(());
    });

    let hook_fired = Arc::new(AtomicBool::new(false));
    let hook_flag = Arc::clone(&hook_fired);
    op.on_cancel(move |_op| {
        hook_flag.store(true, Ordering::SeqCst);
    });

    let b_ran = Arc::new(AtomicBool::new(false));
    let b_flag = Arc::clone(&b_ran);
    let blocked = Operation::sync(move |_op| {
        b_flag.store(true, Ordering::SeqCst);
        Ok(None)
    });

    queue.add_operations(&[op.clone(), blocked.clone()])?;
    with_timeout(async { started_rx.await }).await?;

    op.cancel();
    assert!(hook_fired.load(Ordering::SeqCst));

    // The cancel itself must not free the slot; the operation is still
    // logically executing until it finishes.
    assert_eq!(op.state(), OpState::Executing);
    assert_eq!(queue.stats().executing, 1);
    assert_eq!(blocked.state(), OpState::Ready);
    assert!(!b_ran.load(Ordering::SeqCst));

    op.finish(Ok(None));
    with_timeout(blocked.wait()).await;
    assert!(b_ran.load(Ordering::SeqCst));
    Ok(())
}
