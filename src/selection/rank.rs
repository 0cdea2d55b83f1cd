use std::cmp::Ordering;

use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::rng::RandomNumberGenerator;
use crate::selection::draw_without_replacement;
use crate::selection::parent_selection::{pool_fitness, ParentSelection};

/// A selection policy that selects candidates based on their rank in the pool.
///
/// Rank-based selection assigns a selection probability to each candidate
/// based on its rank, rather than its absolute score. This helps prevent
/// premature convergence when one candidate's score is far above the rest,
/// and it is indifferent to the sign and scale of scores.
///
/// With `n` candidates ranked from worst (`0`) to best (`n - 1`) and pressure
/// `sp`, the probability of rank `r` is
/// `(2 - sp) / n + 2 r (sp - 1) / (n (n - 1))`.
///
/// # Examples
///
/// ```
/// use heurist::selection::rank::RankBasedSelection;
///
/// let selection = RankBasedSelection::new(2.0).unwrap();
/// let probs = selection.probabilities(&[5.0, 1.0, 3.0]);
///
/// assert!(probs[0] > probs[2] && probs[2] > probs[1]);
/// assert_eq!(probs[1], 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct RankBasedSelection {
    /// In `[1, 2]`; higher values increase selection pressure.
    selection_pressure: f64,
}

impl RankBasedSelection {
    /// Creates a new RankBasedSelection policy.
    ///
    /// * `selection_pressure` - Must be in the range [1.0, 2.0].
    ///   - At 1.0, all candidates have equal selection probability
    ///   - At 2.0, the worst candidate is never selected
    ///
    /// # Errors
    ///
    /// Returns a `SearchError::Configuration` error if `selection_pressure` is
    /// not in the range [1.0, 2.0].
    pub fn new(selection_pressure: f64) -> Result<Self> {
        if !(1.0..=2.0).contains(&selection_pressure) {
            return Err(SearchError::Configuration(
                "Selection pressure must be in the range [1.0, 2.0]".to_string(),
            ));
        }

        Ok(Self { selection_pressure })
    }

    /// Selection probability of each entry of a larger-is-better fitness slice.
    pub fn probabilities(&self, fitness: &[f64]) -> Vec<f64> {
        let n = fitness.len();
        if n < 2 {
            return vec![1.0; n];
        }

        let mut indices: Vec<usize> = (0..n).collect();
        indices.sort_by(|&a, &b| {
            fitness[a]
                .partial_cmp(&fitness[b])
                .unwrap_or(Ordering::Equal)
                .then(b.cmp(&a))
        });

        let size = n as f64;
        let mut probs = vec![0.0; n];
        for (rank, &idx) in indices.iter().enumerate() {
            let rank = rank as f64;
            probs[idx] = (2.0 - self.selection_pressure) / size
                + (2.0 * rank * (self.selection_pressure - 1.0)) / (size * (size - 1.0));
        }
        probs
    }
}

impl Default for RankBasedSelection {
    fn default() -> Self {
        Self {
            selection_pressure: 1.5,
        }
    }
}

impl ParentSelection for RankBasedSelection {
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

        let probs = self.probabilities(&pool_fitness(pool, direction));
        let drawn = draw_without_replacement(&probs, amount, rng)?;

        Ok(drawn.into_iter().map(|i| pool[i]).collect())
    }
}
