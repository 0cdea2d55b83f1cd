use std::fmt::Debug;

use crate::candidate::{Candidate, Direction};
use crate::error::Result;
use crate::rng::RandomNumberGenerator;

/// Trait for parent selection policies.
///
/// A policy chooses which scored candidates a new prompt is built from.
/// Policies are stateless apart from their parameters, so one instance can be
/// shared by every selection of a run.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use heurist::candidate::{Candidate, CandidateId, Direction};
/// use heurist::rng::RandomNumberGenerator;
/// use heurist::selection::{ParentSelection, RouletteWheelSelection};
///
/// let pool: Vec<Candidate> = (0..5)
///     .map(|i| {
///         Candidate::new(CandidateId(i), "def f():\n    return 0\n", None, 0, vec![])
///             .into_scored(i as f64, Duration::ZERO)
///             .unwrap()
///     })
///     .collect();
/// let refs: Vec<&Candidate> = pool.iter().collect();
///
/// let mut rng = RandomNumberGenerator::from_seed(3);
/// let parents = RouletteWheelSelection::new()
///     .select(&refs, 2, Direction::Maximize, &mut rng)
///     .unwrap();
///
/// assert_eq!(parents.len(), 2);
/// assert_ne!(parents[0].id(), parents[1].id());
/// ```
pub trait ParentSelection: Debug + Send + Sync {
    /// Selects up to `amount` distinct candidates from `pool`.
    ///
    /// # Arguments
    ///
    /// * `pool` - Scored candidates to choose from.
    /// * `amount` - The number of parents wanted.
    /// * `direction` - Whether higher or lower scores are better.
    /// * `rng` - The run's random number generator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is empty
    /// - The weights derived from the scores are unusable
    fn select<'a>(
        &self,
        pool: &[&'a Candidate],
        amount: usize,
        direction: Direction,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Vec<&'a Candidate>>;
}

/// Fitness of each pool member on a larger-is-better scale.
///
/// Unscored members (which a population never holds) get the lowest fitness
/// present.
pub(crate) fn pool_fitness(pool: &[&Candidate], direction: Direction) -> Vec<f64> {
    let raw: Vec<Option<f64>> = pool
        .iter()
        .map(|c| c.score().map(|s| direction.fitness(s)))
        .collect();
    let floor = raw
        .iter()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let floor = if floor.is_finite() { floor } else { 0.0 };
    raw.into_iter().map(|f| f.unwrap_or(floor)).collect()
}
