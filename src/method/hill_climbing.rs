//! # Hill Climbing
//!
//! A (1+1) search: each lane holds one incumbent, every prompt asks for a
//! strictly better variant of a lane's incumbent, and a scored candidate
//! replaces the incumbent of its origin lane if and only if its score is
//! strictly better. Incumbents therefore never get worse.
//!
//! Several lanes run independent climbs from the same seed; prompts visit
//! them round-robin.

use tracing::debug;

use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::population::Insertion;
use crate::rng::RandomNumberGenerator;
use crate::sampler::Operator;

use super::{SearchMethod, Selection};

#[derive(Debug, Clone)]
pub struct HillClimbing {
    direction: Direction,
    lanes: Vec<Option<Candidate>>,
    next_lane: usize,
}

impl HillClimbing {
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` if `lanes` is zero.
    pub fn new(direction: Direction, lanes: usize) -> Result<Self> {
        if lanes == 0 {
            return Err(SearchError::Configuration(
                "Hill climbing needs at least one lane".to_string(),
            ));
        }
        Ok(Self {
            direction,
            lanes: vec![None; lanes],
            next_lane: 0,
        })
    }

    /// Current incumbent of each lane.
    pub fn incumbents(&self) -> &[Option<Candidate>] {
        &self.lanes
    }

    /// Offers `candidate` to one lane.
    fn offer(&mut self, lane: usize, candidate: Candidate) -> Insertion {
        let direction = self.direction;
        let Some(incumbent) = self.lanes[lane].as_mut() else {
            self.lanes[lane] = Some(candidate);
            return Insertion::Inserted;
        };

        match (candidate.score(), incumbent.score()) {
            (Some(new), Some(old)) if direction.is_better(new, old) => {
                let evicted = incumbent.id();
                debug!(lane, %evicted, improved = %candidate.id(), score = new, "incumbent replaced");
                *incumbent = candidate;
                Insertion::Replaced { evicted }
            }
            _ => Insertion::Rejected,
        }
    }
}

impl SearchMethod for HillClimbing {
    fn name(&self) -> &'static str {
        "hill_climbing"
    }

    fn candidates(&self) -> Vec<&Candidate> {
        let mut seen = Vec::new();
        for candidate in self.lanes.iter().flatten() {
            if !seen.iter().any(|c: &&Candidate| c.id() == candidate.id()) {
                seen.push(candidate);
            }
        }
        seen
    }

    fn best(&self) -> Option<&Candidate> {
        self.lanes
            .iter()
            .flatten()
            .max_by(|a, b| a.compare(b, self.direction))
    }

    fn select_parents(&mut self, _rng: &mut RandomNumberGenerator) -> Result<Selection> {
        let count = self.lanes.len();
        for step in 0..count {
            let lane = (self.next_lane + step) % count;
            if let Some(incumbent) = &self.lanes[lane] {
                self.next_lane = (lane + 1) % count;
                return Ok(Selection {
                    parents: vec![incumbent.clone()],
                    operator: Operator::Improve,
                    origin: Some(lane),
                });
            }
        }
        Err(SearchError::EmptyPopulation)
    }

    /// A candidate with an origin lane competes in that lane only; one without
    /// (a seed or a bootstrap sample) is offered to every lane.
    fn insert(
        &mut self,
        candidate: Candidate,
        _rng: &mut RandomNumberGenerator,
    ) -> Result<Insertion> {
        if !candidate.is_scored() {
            return Err(SearchError::Evaluation(format!(
                "Candidate {} has no score and cannot be stored",
                candidate.id()
            )));
        }

        match candidate.origin() {
            Some(lane) if lane < self.lanes.len() => Ok(self.offer(lane, candidate)),
            _ => {
                let mut outcome = Insertion::Rejected;
                for lane in 0..self.lanes.len() {
                    let result = self.offer(lane, candidate.clone());
                    if outcome == Insertion::Rejected {
                        outcome = result;
                    }
                }
                Ok(outcome)
            }
        }
    }
}
