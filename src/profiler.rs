//! # Profilers
//!
//! A profiler observes a run: one [`SampleEvent`] per finished sample
//! attempt, one [`EvaluationEvent`] per finished evaluation, and the final
//! [`RunReport`]. Profilers are called from the controller's coordinating
//! thread only, so implementations need no synchronisation of their own.
//!
//! Two profilers ship with the crate:
//!
//! - [`TracingProfiler`] emits `tracing` events at the configured
//!   [`LogLevel`]. It is installed when no other profiler is given.
//! - [`MemoryProfiler`] keeps every event, the best-score curve and the
//!   lineage in memory. Clones share the same records, so a clone kept by
//!   the caller can be inspected after the run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::candidate::CandidateId;
use crate::evaluator::FailureKind;
use crate::evolution::options::{optional_seconds, seconds, LogLevel};
use crate::evolution::state::RunReport;
use crate::sampler::Operator;

/// A finished sample attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleEvent {
    pub timestamp: DateTime<Utc>,
    pub generation: usize,
    pub operator: Operator,
    pub parents: Vec<CandidateId>,
    /// Id given to the parsed candidate; `None` when the attempt failed.
    pub candidate: Option<CandidateId>,
    #[serde(with = "seconds")]
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl SampleEvent {
    pub fn is_success(&self) -> bool {
        self.candidate.is_some()
    }
}

/// A finished evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationEvent {
    pub timestamp: DateTime<Utc>,
    pub generation: usize,
    pub candidate: CandidateId,
    pub parents: Vec<CandidateId>,
    pub score: Option<f64>,
    pub failure: Option<FailureKind>,
    pub message: Option<String>,
    #[serde(with = "optional_seconds")]
    pub sample_time: Option<Duration>,
    #[serde(with = "seconds")]
    pub evaluate_time: Duration,
    /// Whether the store accepted the candidate.
    pub stored: bool,
    /// Whether the candidate beat every score seen before it.
    pub improved: bool,
    /// Best score of the run after this evaluation.
    pub best_score: Option<f64>,
}

impl EvaluationEvent {
    pub fn is_success(&self) -> bool {
        self.score.is_some()
    }
}

/// Observer of a run.
pub trait Profiler: Send {
    fn record_sample(&mut self, event: &SampleEvent);

    fn record_evaluation(&mut self, event: &EvaluationEvent);

    /// Called once, after the controller reached TERMINATED.
    fn finish(&mut self, _report: &RunReport) {}
}

/// Logs run events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProfiler {
    log_level: LogLevel,
}

impl TracingProfiler {
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }
}

impl Profiler for TracingProfiler {
    fn record_sample(&mut self, event: &SampleEvent) {
        if self.log_level != LogLevel::Verbose {
            return;
        }
        match (&event.candidate, &event.error) {
            (Some(id), _) => debug!(
                candidate = %id,
                generation = event.generation,
                operator = ?event.operator,
                elapsed = ?event.elapsed,
                "sampled"
            ),
            (None, error) => warn!(
                generation = event.generation,
                operator = ?event.operator,
                error = error.as_deref().unwrap_or("unknown"),
                "sample failed"
            ),
        }
    }

    fn record_evaluation(&mut self, event: &EvaluationEvent) {
        match self.log_level {
            LogLevel::None => {}
            LogLevel::Minimal => {
                if event.improved {
                    info!(
                        candidate = %event.candidate,
                        generation = event.generation,
                        score = event.score,
                        "new best"
                    );
                }
            }
            LogLevel::Verbose => {
                if let Some(kind) = event.failure {
                    warn!(
                        candidate = %event.candidate,
                        %kind,
                        message = event.message.as_deref().unwrap_or(""),
                        "evaluation failed"
                    );
                } else {
                    info!(
                        candidate = %event.candidate,
                        generation = event.generation,
                        score = event.score,
                        stored = event.stored,
                        improved = event.improved,
                        best = event.best_score,
                        "evaluated"
                    );
                }
            }
        }
    }

    fn finish(&mut self, report: &RunReport) {
        if self.log_level == LogLevel::None {
            return;
        }
        info!(
            state = ?report.state,
            samples = report.samples,
            evaluations = report.evaluations,
            failures = report.sample_failures + report.evaluation_failures,
            timeouts = report.timeouts,
            best = report.best_score(),
            elapsed = ?report.elapsed,
            "run finished"
        );
    }
}

#[derive(Debug, Default)]
struct Records {
    samples: Vec<SampleEvent>,
    evaluations: Vec<EvaluationEvent>,
    best_curve: Vec<(usize, f64)>,
    lineage: HashMap<CandidateId, Vec<CandidateId>>,
    report: Option<RunReport>,
}

/// Keeps every event of a run in memory.
///
/// ```rust
/// use heurist::profiler::MemoryProfiler;
///
/// let profiler = MemoryProfiler::new();
/// let handle = profiler.clone();
/// // hand `profiler` to the controller builder, inspect `handle` afterwards
/// assert_eq!(handle.evaluation_count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryProfiler {
    records: Arc<Mutex<Records>>,
}

impl MemoryProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves complete records behind.
    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn samples(&self) -> Vec<SampleEvent> {
        self.lock().samples.clone()
    }

    pub fn evaluations(&self) -> Vec<EvaluationEvent> {
        self.lock().evaluations.clone()
    }

    pub fn sample_count(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn evaluation_count(&self) -> usize {
        self.lock().evaluations.len()
    }

    /// `(evaluations so far, best score)` at every improvement.
    pub fn best_curve(&self) -> Vec<(usize, f64)> {
        self.lock().best_curve.clone()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.lock().best_curve.last().map(|&(_, score)| score)
    }

    /// Parents of an evaluated candidate.
    pub fn parents_of(&self, id: CandidateId) -> Option<Vec<CandidateId>> {
        self.lock().lineage.get(&id).cloned()
    }

    pub fn report(&self) -> Option<RunReport> {
        self.lock().report.clone()
    }

    /// All evaluation events as JSON lines.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Serialization` if an event cannot be encoded.
    pub fn evaluations_json_lines(&self) -> crate::error::Result<String> {
        let records = self.lock();
        let mut out = String::new();
        for event in &records.evaluations {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Profiler for MemoryProfiler {
    fn record_sample(&mut self, event: &SampleEvent) {
        self.lock().samples.push(event.clone());
    }

    fn record_evaluation(&mut self, event: &EvaluationEvent) {
        let mut records = self.lock();
        records.lineage.insert(event.candidate, event.parents.clone());
        records.evaluations.push(event.clone());
        if event.improved {
            if let Some(score) = event.score {
                let count = records.evaluations.len();
                records.best_curve.push((count, score));
            }
        }
    }

    fn finish(&mut self, report: &RunReport) {
        self.lock().report = Some(report.clone());
    }
}
