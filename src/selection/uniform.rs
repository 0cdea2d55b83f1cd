use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::rng::RandomNumberGenerator;
use crate::selection::parent_selection::ParentSelection;

/// Uniform random selection without replacement; scores are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformSelection;

impl ParentSelection for UniformSelection {
    fn select<'a>(
        &self,
        pool: &[&'a Candidate],
        amount: usize,
        _direction: Direction,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Vec<&'a Candidate>> {
        if pool.is_empty() {
            return Err(SearchError::EmptyPopulation);
        }

        Ok(rng
            .sample_indices(pool.len(), amount)
            .into_iter()
            .map(|i| pool[i])
            .collect())
    }
}
