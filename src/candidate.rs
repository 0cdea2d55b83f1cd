//! # Candidate
//!
//! A `Candidate` is one generated program plus the metadata the search needs:
//! its rationale, its lineage and, once evaluated, its score.
//!
//! The program text never changes after construction. A score is attached
//! exactly once through [`Candidate::into_scored`], which consumes the unscored
//! value; evaluating the same program again means building a new candidate
//! with a new identifier.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use heurist::candidate::{Candidate, CandidateId};
//!
//! let draft = Candidate::new(
//!     CandidateId(1),
//!     "def f(x):\n    return x\n",
//!     None,
//!     0,
//!     vec![CandidateId(0)],
//! );
//! assert!(draft.score().is_none());
//!
//! let scored = draft.into_scored(3.5, Duration::from_millis(12)).unwrap();
//! assert_eq!(scored.score(), Some(3.5));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Identifier of a candidate, unique within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether the task rewards larger or smaller scores. Fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// Returns `true` if `candidate` is strictly better than `incumbent`.
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }

    /// Orders two scores so that `Ordering::Greater` means `a` is better.
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        match self {
            Direction::Maximize => ordering,
            Direction::Minimize => ordering.reverse(),
        }
    }

    /// Maps a score onto a scale where larger is always better.
    pub fn fitness(self, score: f64) -> f64 {
        match self {
            Direction::Maximize => score,
            Direction::Minimize => -score,
        }
    }

    /// A short human readable hint used in prompts.
    pub fn hint(self) -> &'static str {
        match self {
            Direction::Maximize => "higher is better",
            Direction::Minimize => "lower is better",
        }
    }
}

/// One generated program and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    id: CandidateId,
    source: String,
    thought: Option<String>,
    score: Option<f64>,
    generation_index: usize,
    sample_time: Option<Duration>,
    evaluate_time: Option<Duration>,
    parents: Vec<CandidateId>,
    origin: Option<usize>,
}

impl Candidate {
    /// Creates an unscored candidate.
    pub fn new(
        id: CandidateId,
        source: impl Into<String>,
        thought: Option<String>,
        generation_index: usize,
        parents: Vec<CandidateId>,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            thought,
            score: None,
            generation_index,
            sample_time: None,
            evaluate_time: None,
            parents,
            origin: None,
        }
    }

    /// Records the lane or island the candidate's parents were drawn from.
    pub fn with_origin(mut self, origin: Option<usize>) -> Self {
        self.origin = origin;
        self
    }

    /// Records how long the generation call took.
    pub fn with_sample_time(mut self, sample_time: Duration) -> Self {
        self.sample_time = Some(sample_time);
        self
    }

    /// Attaches a score, consuming the unscored candidate.
    ///
    /// # Errors
    ///
    /// - `SearchError::Evaluation` if the candidate already carries a score.
    /// - `SearchError::InvalidNumericValue` if `score` is NaN or infinite.
    pub fn into_scored(mut self, score: f64, evaluate_time: Duration) -> Result<Self> {
        if self.score.is_some() {
            return Err(SearchError::Evaluation(format!(
                "Candidate {} is already scored; re-evaluation must produce a new candidate",
                self.id
            )));
        }
        if !score.is_finite() {
            return Err(SearchError::InvalidNumericValue(format!(
                "Non-finite score {} for candidate {}",
                score, self.id
            )));
        }
        self.score = Some(score);
        self.evaluate_time = Some(evaluate_time);
        Ok(self)
    }

    pub fn id(&self) -> CandidateId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn thought(&self) -> Option<&str> {
        self.thought.as_deref()
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }

    pub fn generation_index(&self) -> usize {
        self.generation_index
    }

    pub fn sample_time(&self) -> Option<Duration> {
        self.sample_time
    }

    pub fn evaluate_time(&self) -> Option<Duration> {
        self.evaluate_time
    }

    pub fn parents(&self) -> &[CandidateId] {
        &self.parents
    }

    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// Number of non-blank source lines, used as a length proxy.
    pub fn length(&self) -> usize {
        self.source.lines().filter(|l| !l.trim().is_empty()).count()
    }

    /// Compares two scored candidates; `Ordering::Greater` means `self` is better.
    ///
    /// Unscored candidates rank below every scored one.
    pub fn compare(&self, other: &Candidate, direction: Direction) -> Ordering {
        match (self.score, other.score) {
            (Some(a), Some(b)) => direction.compare(a, b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}
