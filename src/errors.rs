// src/errors.rs

//! Crate-wide error types.
//!
//! Only *construction-time* failures surface through [`ConstructionError`]:
//! cycle-closing dependency edges, mutating an operation that has already
//! been scheduled, double submission, and invalid queue options. Failures
//! *inside* work functions are never errors at this level; they are captured
//! into the owning operation's error slot and read back via
//! [`Operation::error`](crate::op::Operation::error) after it finishes.

use thiserror::Error;

use crate::op::OpId;

#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("configuration error: {0}")]
    Options(String),

    #[error("dependency cycle detected involving operation {0}")]
    DependencyCycle(OpId),

    #[error("operation {0} has already been scheduled for execution")]
    AlreadyStarted(OpId),

    #[error("operation {0} is already finished")]
    AlreadyFinished(OpId),

    #[error("operation {0} already belongs to a queue")]
    AlreadyQueued(OpId),

    #[error("operation {op} depends on {dep}, which is not queued here")]
    ForeignDependency { op: OpId, dep: OpId },

    #[error("no tokio runtime available for the worker backend: {0}")]
    NoRuntime(String),
}

pub type Result<T> = std::result::Result<T, ConstructionError>;
