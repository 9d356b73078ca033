// tests/state_machine.rs

//! State monotonicity, ownership rules, diagnostics and options parsing.

use std::error::Error;

use opdag::{
    Concurrency, ConstructionError, OpState, Operation, OperationQueue, Priority, QueueOptions,
};
use opdag_test_utils::backends::ManualBackend;
use opdag_test_utils::builders::noop_op;
use opdag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn states_progress_monotonically() -> TestResult {
    init_tracing();

    let (backend, _started) = ManualBackend::new();
    let queue = OperationQueue::with_backend(
        QueueOptions {
            max_concurrent: Concurrency::Bounded(2),
            suspended: true,
        },
        backend,
    )?;

    let a = noop_op();
    let b = noop_op();
    b.add_dependency(&a)?;

    assert_eq!(a.state(), OpState::Pending);
    assert_eq!(b.state(), OpState::Pending);

    queue.add_operations(&[a.clone(), b.clone()])?;
    assert_eq!(a.state(), OpState::Ready);
    assert_eq!(b.state(), OpState::Pending);

    queue.set_suspended(false);
    assert_eq!(a.state(), OpState::Executing);
    assert_eq!(b.state(), OpState::Pending);

    a.finish(Ok(None));
    assert_eq!(a.state(), OpState::Finished);
    // B's promotion and dispatch happen inside the same finish delivery.
    assert_eq!(b.state(), OpState::Executing);

    b.finish(Ok(None));
    assert_eq!(b.state(), OpState::Finished);
    Ok(())
}

#[test]
fn double_submission_rejected() -> TestResult {
    init_tracing();

    let (backend, _started) = ManualBackend::new();
    let queue = OperationQueue::with_backend(QueueOptions::default(), backend)?;
    let (other_backend, _other_started) = ManualBackend::new();
    let other_queue = OperationQueue::with_backend(QueueOptions::default(), other_backend)?;

    let op = noop_op();
    queue.add_operation(&op)?;

    let err = queue.add_operation(&op).unwrap_err();
    assert!(matches!(err, ConstructionError::AlreadyQueued(_)));

    // An operation belongs to exactly one queue for its whole life.
    let err = other_queue.add_operation(&op).unwrap_err();
    assert!(matches!(err, ConstructionError::AlreadyQueued(_)));

    op.finish(Ok(None));
    let err = queue.add_operation(&op).unwrap_err();
    assert!(matches!(err, ConstructionError::AlreadyQueued(_)));
    Ok(())
}

#[test]
fn duplicate_within_batch_rejected() -> TestResult {
    init_tracing();

    let (backend, started) = ManualBackend::new();
    let queue = OperationQueue::with_backend(QueueOptions::default(), backend)?;

    let op = noop_op();
    let err = queue.add_operations(&[op.clone(), op.clone()]).unwrap_err();
    assert!(matches!(err, ConstructionError::AlreadyQueued(_)));
    assert!(started.lock().unwrap().is_empty());

    // The rejected batch did not claim the operation.
    queue.add_operation(&op)?;
    Ok(())
}

#[test]
fn stats_reflect_partitions_and_stalls() -> TestResult {
    init_tracing();

    let (backend, _started) = ManualBackend::new();
    let queue = OperationQueue::with_backend(
        QueueOptions {
            max_concurrent: Concurrency::Bounded(1),
            suspended: false,
        },
        backend,
    )?;

    let a = noop_op();
    let b = noop_op();
    let c = noop_op();
    c.add_dependency(&b)?;
    queue.add_operations(&[a.clone(), b.clone(), c.clone()])?;

    let stats = queue.stats();
    assert_eq!(stats.executing, 1);
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.finished, 0);
    // The executing operation has an age; this is the stall diagnostic for
    // asynchronous work that never calls finish.
    assert!(stats.oldest_executing_age.is_some());

    a.finish(Ok(None));
    b.finish(Ok(None));
    c.finish(Ok(None));
    let stats = queue.stats();
    assert_eq!(stats.finished, 3);
    assert_eq!(stats.executing, 0);
    assert!(stats.oldest_executing_age.is_none());
    Ok(())
}

#[test]
fn options_parse_from_toml() -> TestResult {
    init_tracing();

    let options: QueueOptions = toml::from_str("max_concurrent = 4\nsuspended = true")?;
    assert_eq!(options.max_concurrent, Concurrency::Bounded(4));
    assert!(options.suspended);

    let options: QueueOptions = toml::from_str("max_concurrent = \"unbounded\"")?;
    assert_eq!(options.max_concurrent, Concurrency::Unbounded);
    assert!(!options.suspended);

    let options: QueueOptions = toml::from_str("")?;
    assert!(matches!(options.max_concurrent, Concurrency::Bounded(n) if n >= 1));
    assert!(!options.suspended);

    let err = toml::from_str::<QueueOptions>("max_concurrent = \"lots\"");
    assert!(err.is_err());
    Ok(())
}

#[test]
fn priority_parses_and_roundtrips() -> TestResult {
    init_tracing();

    assert_eq!("very-high".parse::<Priority>()?, Priority::VeryHigh);
    assert_eq!(" normal ".parse::<Priority>()?, Priority::Normal);
    assert!("urgent".parse::<Priority>().is_err());

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Wrapper {
        priority: Priority,
    }

    let wrapper: Wrapper = toml::from_str("priority = \"very-low\"")?;
    assert_eq!(wrapper.priority, Priority::VeryLow);
    let rendered = toml::to_string(&Wrapper {
        priority: Priority::High,
    })?;
    assert!(rendered.contains("\"high\""));
    Ok(())
}

#[test]
fn finish_on_undispatched_operation_is_tolerated() -> TestResult {
    init_tracing();

    // Out-of-contract but must not wedge the queue: finishing an operation
    // that was never dispatched frees it like any other finish.
    let (backend, started) = ManualBackend::new();
    let queue = OperationQueue::with_backend(
        QueueOptions {
            max_concurrent: Concurrency::Bounded(1),
            suspended: true,
        },
        backend,
    )?;

    let a = noop_op();
    let b = noop_op();
    queue.add_operations(&[a.clone(), b.clone()])?;

    a.finish(Ok(None));
    assert!(a.is_finished());

    queue.set_suspended(false);
    assert_eq!(started.lock().unwrap().len(), 1);
    assert_eq!(started.lock().unwrap()[0].id(), b.id());
    Ok(())
}

#[test]
fn priority_parse_error_lists_choices() {
    let err = "max".parse::<Priority>().unwrap_err();
    assert!(err.contains("very-high"));
}

#[test]
fn operation_debug_is_compact() {
    let op = Operation::sync(|_op| Ok(None));
    let rendered = format!("{op:?}");
    assert!(rendered.contains("Operation"));
    assert!(rendered.contains("Pending"));
}
