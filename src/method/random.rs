//! Random sampling: every prompt asks for an independent solution and every
//! scored candidate goes into one bounded buffer that keeps the best.

use crate::candidate::{Candidate, Direction};
use crate::error::Result;
use crate::population::{ClusterKey, Insertion, Population, SignatureKind};
use crate::rng::RandomNumberGenerator;

use super::{SearchMethod, Selection};

const BUFFER: ClusterKey = ClusterKey(0);

#[derive(Debug, Clone)]
pub struct RandomSampling {
    buffer: Population,
}

impl RandomSampling {
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` if `capacity` is zero.
    pub fn new(direction: Direction, capacity: usize) -> Result<Self> {
        Ok(Self {
            buffer: Population::new(capacity, direction, SignatureKind::Textual)?,
        })
    }

    pub fn population(&self) -> &Population {
        &self.buffer
    }
}

impl SearchMethod for RandomSampling {
    fn name(&self) -> &'static str {
        "random_sampling"
    }

    fn candidates(&self) -> Vec<&Candidate> {
        self.buffer.candidates().collect()
    }

    fn best(&self) -> Option<&Candidate> {
        self.buffer.best()
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn select_parents(&mut self, _rng: &mut RandomNumberGenerator) -> Result<Selection> {
        Ok(Selection::fresh())
    }

    fn insert(
        &mut self,
        candidate: Candidate,
        _rng: &mut RandomNumberGenerator,
    ) -> Result<Insertion> {
        self.buffer.insert_into(BUFFER, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;
    use crate::sampler::Operator;
    use std::time::Duration;

    #[test]
    fn test_never_selects_parents() {
        let mut method = RandomSampling::new(Direction::Maximize, 2).unwrap();
        let mut rng = RandomNumberGenerator::from_seed(1);
        let seed = Candidate::new(CandidateId(0), "def f():\n    return 0\n", None, 0, vec![])
            .into_scored(1.0, Duration::ZERO)
            .unwrap();
        method.seed(seed, &mut rng).unwrap();

        let selection = method.select_parents(&mut rng).unwrap();
        assert!(selection.parents.is_empty());
        assert_eq!(selection.operator, Operator::Fresh);
    }

    #[test]
    fn test_buffer_keeps_best() {
        let mut method = RandomSampling::new(Direction::Maximize, 2).unwrap();
        let mut rng = RandomNumberGenerator::from_seed(1);
        for (id, score) in [(1, 3.0), (2, 1.0), (3, 2.0)] {
            let source = format!("def f():\n    return {}\n", id);
            let candidate = Candidate::new(CandidateId(id), source, None, 0, vec![])
                .into_scored(score, Duration::ZERO)
                .unwrap();
            method.insert(candidate, &mut rng).unwrap();
        }

        assert_eq!(method.len(), 2);
        assert!(!method.contains(CandidateId(2)));
        assert_eq!(method.best().unwrap().id(), CandidateId(1));
    }
}
