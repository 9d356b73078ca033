// src/exec/mod.rs

//! Worker execution layer.
//!
//! - [`backend`] defines the `WorkerBackend` trait and the production
//!   tokio-based implementation.

pub mod backend;

pub use backend::{TokioWorkerBackend, WorkerBackend};
