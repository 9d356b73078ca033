// src/types.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ConstructionError, Result};

/// Scheduling priority of an operation.
///
/// Among simultaneously-Ready operations the highest priority dispatches
/// first; within a priority, submission order breaks ties.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "very-low" => Ok(Priority::VeryLow),
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "very-high" => Ok(Priority::VeryHigh),
            other => Err(format!(
                "invalid priority: {other} (expected \"very-low\", \"low\", \"normal\", \"high\" or \"very-high\")"
            )),
        }
    }
}

/// Concurrency limit of a queue.
///
/// Serialized either as a plain integer or as the string `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConcurrencyRepr", into = "ConcurrencyRepr")]
pub enum Concurrency {
    Bounded(usize),
    Unbounded,
}

impl Concurrency {
    /// Default limit derived from the host's logical CPU count.
    pub fn host_derived() -> Self {
        Concurrency::Bounded(num_cpus::get().max(1))
    }

    /// Whether one more operation may start given the current occupancy.
    pub(crate) fn allows(self, executing: usize) -> bool {
        match self {
            Concurrency::Bounded(limit) => executing < limit,
            Concurrency::Unbounded => true,
        }
    }

    pub(crate) fn validate(self) -> Result<()> {
        if self == Concurrency::Bounded(0) {
            return Err(ConstructionError::Options(
                "max_concurrent must be >= 1 (got 0)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::host_derived()
    }
}

impl FromStr for Concurrency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Concurrency::Unbounded);
        }
        s.parse::<usize>()
            .map(Concurrency::Bounded)
            .map_err(|_| format!("invalid concurrency: {s} (expected an integer or \"unbounded\")"))
    }
}

/// Serde-facing representation: an integer or the word "unbounded".
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ConcurrencyRepr {
    Count(usize),
    Word(String),
}

impl TryFrom<ConcurrencyRepr> for Concurrency {
    type Error = String;

    fn try_from(repr: ConcurrencyRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ConcurrencyRepr::Count(n) => Ok(Concurrency::Bounded(n)),
            ConcurrencyRepr::Word(w) => w.parse(),
        }
    }
}

impl From<Concurrency> for ConcurrencyRepr {
    fn from(value: Concurrency) -> Self {
        match value {
            Concurrency::Bounded(n) => ConcurrencyRepr::Count(n),
            Concurrency::Unbounded => ConcurrencyRepr::Word("unbounded".to_string()),
        }
    }
}

/// Behaviour options for an [`OperationQueue`](crate::queue::OperationQueue).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// How many operations may be Executing at once.
    pub max_concurrent: Concurrency,

    /// Start the queue suspended; Ready operations accumulate but nothing
    /// dispatches until `set_suspended(false)`.
    pub suspended: bool,
}
