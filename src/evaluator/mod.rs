//! # Evaluators
//!
//! An evaluator turns a candidate into a score or an [`EvaluationFailure`].
//! Failures are ordinary values: the controller counts them against the budget
//! and reports them to profilers, but never inserts the candidate and never
//! aborts the run because of them.
//!
//! Two implementations are provided:
//!
//! - [`SecureEvaluator`] runs the assembled program in a separate worker
//!   process with a wall-clock timeout. This is the evaluator for untrusted,
//!   generated code.
//! - [`FnEvaluator`] wraps a closure and runs in-process. It is meant for
//!   tests and for trusted, pure-Rust scoring functions.
//!
//! ## Example
//!
//! ```rust
//! use heurist::candidate::{Candidate, CandidateId};
//! use heurist::evaluator::{Evaluate, EvaluationFailure, FnEvaluator};
//!
//! let evaluator = FnEvaluator::new(|candidate: &Candidate| {
//!     if candidate.source().contains("raise") {
//!         Err(EvaluationFailure::runtime("candidate raised"))
//!     } else {
//!         Ok(candidate.length() as f64)
//!     }
//! });
//!
//! let candidate = Candidate::new(CandidateId(1), "def f():\n    return 1\n", None, 0, vec![]);
//! assert_eq!(evaluator.evaluate(&candidate).unwrap(), 2.0);
//! ```

pub mod protocol;
pub mod sandbox;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::Candidate;

pub use sandbox::{SandboxOptions, SecureEvaluator};

/// Why an evaluation produced no score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker exceeded its wall-clock limit and was killed.
    Timeout,
    /// The candidate's code raised, failed to compile or returned garbage.
    Runtime,
    /// The worker died without answering (signal, abort, out of memory).
    Crash,
    /// The worker answered with a score that is not a finite number.
    InvalidScore,
    /// The worker process could not be started.
    Spawn,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Runtime => "runtime error",
            FailureKind::Crash => "crash",
            FailureKind::InvalidScore => "invalid score",
            FailureKind::Spawn => "spawn failure",
        };
        f.write_str(name)
    }
}

/// A failed evaluation attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct EvaluationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl EvaluationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("evaluation exceeded {:.3}s", limit.as_secs_f64()),
        )
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Runtime, message)
    }

    pub fn crash(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Crash, message)
    }

    pub fn invalid_score(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidScore, message)
    }

    pub fn spawn(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Spawn, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

/// Scores one candidate.
///
/// Implementations must be callable from several evaluator threads at once and
/// must never panic or block past their own timeout.
pub trait Evaluate: Send + Sync {
    fn evaluate(&self, candidate: &Candidate) -> Result<f64, EvaluationFailure>;
}

/// In-process evaluator backed by a closure.
pub struct FnEvaluator<F> {
    function: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&Candidate) -> Result<f64, EvaluationFailure> + Send + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> Evaluate for FnEvaluator<F>
where
    F: Fn(&Candidate) -> Result<f64, EvaluationFailure> + Send + Sync,
{
    fn evaluate(&self, candidate: &Candidate) -> Result<f64, EvaluationFailure> {
        let score = (self.function)(candidate)?;
        if !score.is_finite() {
            return Err(EvaluationFailure::invalid_score(format!(
                "non-finite score {}",
                score
            )));
        }
        Ok(score)
    }
}

impl<F> fmt::Debug for FnEvaluator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEvaluator").finish_non_exhaustive()
    }
}
