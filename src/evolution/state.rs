//! Controller lifecycle and run bookkeeping.
//!
//! A run moves through `Init -> Running -> Draining -> Terminated`, never
//! backwards. [`RunState`] holds the counters the controller updates as
//! completions arrive; it is owned by the coordinating thread alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::candidate::{Candidate, Direction};
use crate::evaluator::FailureKind;
use crate::evolution::options::seconds;
use crate::population::Insertion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    /// Seeding the store; no sample has been dispatched.
    Init,
    /// Dispatching samples and applying completions.
    Running,
    /// No new dispatches; in-flight calls are still applied.
    Draining,
    /// Absorbing final state.
    Terminated,
}

impl ControllerState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, next),
            (Init, Running) | (Init, Terminated) | (Running, Draining) | (Draining, Terminated)
        )
    }
}

/// Requests a graceful stop of a running controller from any thread.
///
/// A stop moves the controller to DRAINING; calls already in flight are
/// still applied.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Counters of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    direction: Direction,
    /// Sample attempts dispatched.
    pub samples: usize,
    pub sample_failures: usize,
    /// Completed evaluations of sampled candidates, failed ones included.
    pub evaluations: usize,
    pub evaluation_failures: usize,
    pub timeouts: usize,
    pub insertions: usize,
    /// Calls still in flight when a drain timed out.
    pub abandoned: usize,
    best: Option<Candidate>,
}

impl RunState {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            samples: 0,
            sample_failures: 0,
            evaluations: 0,
            evaluation_failures: 0,
            timeouts: 0,
            insertions: 0,
            abandoned: 0,
            best: None,
        }
    }

    /// Attempts that have run to completion: failed samples plus completed
    /// evaluations.
    pub fn finished_attempts(&self) -> usize {
        self.sample_failures + self.evaluations
    }

    /// Generation of the next dispatched sample.
    pub fn generation(&self, generation_size: usize) -> usize {
        self.finished_attempts() / generation_size.max(1)
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().and_then(Candidate::score)
    }

    /// Tracks the best score seen so far, stored or not. Returns whether
    /// `candidate` improved on it.
    pub fn observe(&mut self, candidate: &Candidate) -> bool {
        let Some(score) = candidate.score() else {
            return false;
        };
        let improved = match self.best_score() {
            Some(best) => self.direction.is_better(score, best),
            None => true,
        };
        if improved {
            self.best = Some(candidate.clone());
        }
        improved
    }

    pub(crate) fn record_insertion(&mut self, insertion: Insertion) {
        if insertion.is_stored() {
            self.insertions += 1;
        }
    }

    pub(crate) fn record_evaluation_failure(&mut self, kind: FailureKind) {
        self.evaluation_failures += 1;
        if kind == FailureKind::Timeout {
            self.timeouts += 1;
        }
    }

    pub(crate) fn report(
        &self,
        state: ControllerState,
        generation_size: usize,
        elapsed: Duration,
    ) -> RunReport {
        RunReport {
            state,
            samples: self.samples,
            sample_failures: self.sample_failures,
            evaluations: self.evaluations,
            evaluation_failures: self.evaluation_failures,
            timeouts: self.timeouts,
            insertions: self.insertions,
            abandoned: self.abandoned,
            generations: self.generation(generation_size),
            best: self.best.clone(),
            elapsed,
        }
    }
}

/// Summary returned when a run terminates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub state: ControllerState,
    pub samples: usize,
    pub sample_failures: usize,
    pub evaluations: usize,
    pub evaluation_failures: usize,
    pub timeouts: usize,
    pub insertions: usize,
    pub abandoned: usize,
    /// Completed generations.
    pub generations: usize,
    pub best: Option<Candidate>,
    #[serde(with = "seconds")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().and_then(Candidate::score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;

    fn scored(id: u64, score: f64) -> Candidate {
        Candidate::new(CandidateId(id), "def f():\n    pass\n", None, 0, vec![])
            .into_scored(score, Duration::ZERO)
            .unwrap()
    }

    #[test]
    fn test_lifecycle_is_monotone() {
        use ControllerState::*;
        assert!(Init.can_transition_to(Running));
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Terminated));
        assert!(!Running.can_transition_to(Init));
        assert!(!Terminated.can_transition_to(Running));
        assert!(!Draining.can_transition_to(Running));
    }

    #[test]
    fn test_observe_tracks_best() {
        let mut state = RunState::new(Direction::Minimize);
        assert!(state.observe(&scored(0, 10.0)));
        assert!(!state.observe(&scored(1, 12.0)));
        assert!(!state.observe(&scored(2, 10.0)));
        assert!(state.observe(&scored(3, 8.0)));
        assert_eq!(state.best().map(Candidate::id), Some(CandidateId(3)));
    }

    #[test]
    fn test_generation_counts_finished_attempts() {
        let mut state = RunState::new(Direction::Maximize);
        state.evaluations = 7;
        state.sample_failures = 3;
        assert_eq!(state.finished_attempts(), 10);
        assert_eq!(state.generation(4), 2);
        assert_eq!(state.generation(0), 10);
    }

    #[test]
    fn test_timeouts_are_failures() {
        let mut state = RunState::new(Direction::Maximize);
        state.record_evaluation_failure(FailureKind::Timeout);
        state.record_evaluation_failure(FailureKind::Crash);
        assert_eq!(state.evaluation_failures, 2);
        assert_eq!(state.timeouts, 1);
    }

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        clone.stop();
        assert!(handle.is_stopped());
    }
}
