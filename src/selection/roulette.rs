use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::rng::RandomNumberGenerator;
use crate::selection::parent_selection::{pool_fitness, ParentSelection};
use crate::selection::draw_without_replacement;

/// A selection policy that selects parents through roulette wheel selection.
///
/// Roulette wheel selection (also known as fitness proportionate selection)
/// selects candidates with probability proportional to their fitness. Scores
/// can be negative and the direction can be either way, so fitness is shifted
/// first: the worst candidate gets `floor_share` of the fitness span and every
/// other candidate gets its distance above the worst on top of that.
///
/// When every candidate has the same score the wheel is uniform.
///
/// # Examples
///
/// ```
/// use heurist::selection::roulette::RouletteWheelSelection;
///
/// let selection = RouletteWheelSelection::new();
/// assert_eq!(selection.weights(&[1.0, 3.0]), vec![0.1, 2.1]);
/// ```
#[derive(Debug, Clone)]
pub struct RouletteWheelSelection {
    /// Share of the fitness span the worst candidate keeps.
    floor_share: f64,
}

impl RouletteWheelSelection {
    /// Creates a new RouletteWheelSelection policy with a floor share of 5%.
    pub fn new() -> Self {
        Self { floor_share: 0.05 }
    }

    /// Turns larger-is-better fitness values into wheel weights.
    pub fn weights(&self, fitness: &[f64]) -> Vec<f64> {
        let min = fitness.iter().copied().fold(f64::INFINITY, f64::min);
        let max = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;

        if !span.is_finite() || span <= 0.0 {
            return vec![1.0; fitness.len()];
        }

        let floor = span * self.floor_share;
        fitness.iter().map(|&f| f - min + floor).collect()
    }
}

impl Default for RouletteWheelSelection {
    fn default() -> Self {
        Self::new()
    }
}

impl ParentSelection for RouletteWheelSelection {
    fn select<'a>(
        &self,
        pool: &[&'a Candidate],
        amount: usize,
        direction: Direction,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Vec<&'a Candidate>> {
        if pool.is_empty() {
            return Err(SearchError::EmptyPopulation);
        }

        let weights = self.weights(&pool_fitness(pool, direction));
        let drawn = draw_without_replacement(&weights, amount, rng)?;

        Ok(drawn.into_iter().map(|i| pool[i]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;
    use std::time::Duration;

    fn pool(scores: &[f64]) -> Vec<Candidate> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                Candidate::new(CandidateId(i as u64), "def f():\n    pass\n", None, 0, vec![])
                    .into_scored(s, Duration::ZERO)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_roulette_wheel_selection() {
        let candidates = pool(&[0.5, 0.8, 0.3, 0.9, 0.1]);
        let refs: Vec<&Candidate> = candidates.iter().collect();
        let mut rng = RandomNumberGenerator::from_seed(42);

        let selected = RouletteWheelSelection::new()
            .select(&refs, 3, Direction::Maximize, &mut rng)
            .unwrap();

        assert_eq!(selected.len(), 3);
        let mut ids: Vec<u64> = selected.iter().map(|c| c.id().0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_favours_fitter_candidates() {
        let candidates = pool(&[1.0, 100.0]);
        let refs: Vec<&Candidate> = candidates.iter().collect();
        let selection = RouletteWheelSelection::new();
        let mut rng = RandomNumberGenerator::from_seed(7);

        let mut minimize_hits = 0;
        let mut maximize_hits = 0;
        for _ in 0..200 {
            let pick = selection.select(&refs, 1, Direction::Minimize, &mut rng).unwrap();
            if pick[0].id() == CandidateId(0) {
                minimize_hits += 1;
            }
            let pick = selection.select(&refs, 1, Direction::Maximize, &mut rng).unwrap();
            if pick[0].id() == CandidateId(1) {
                maximize_hits += 1;
            }
        }

        assert!(minimize_hits > 150);
        assert!(maximize_hits > 150);
    }

    #[test]
    fn test_equal_scores_are_uniform_weights() {
        let selection = RouletteWheelSelection::new();
        assert_eq!(selection.weights(&[-2.0, -2.0, -2.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_empty_pool() {
        let mut rng = RandomNumberGenerator::from_seed(1);
        let result = RouletteWheelSelection::new().select(&[], 1, Direction::Maximize, &mut rng);
        assert!(matches!(result, Err(SearchError::EmptyPopulation)));
    }
}
