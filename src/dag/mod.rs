// src/dag/mod.rs

//! Dependency tracking between operations.
//!
//! - [`graph`] holds the directed acyclic graph of "must finish before"
//!   relations, with cycle rejection and incremental readiness counts.

pub mod graph;

pub use graph::DepGraph;
