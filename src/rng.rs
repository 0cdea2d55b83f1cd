//! # RandomNumberGenerator
//!
//! The `RandomNumberGenerator` struct wraps a seedable `StdRng` and provides the
//! draws the selection policies need: uniform floats, indices, sampling without
//! replacement and weighted choice.
//!
//! ## Example
//!
//! ```rust
//! use heurist::rng::RandomNumberGenerator;
//!
//! let mut rng = RandomNumberGenerator::from_seed(7);
//! let picks = rng.sample_indices(10, 3);
//!
//! assert_eq!(picks.len(), 3);
//! ```

use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    seq::index,
    Rng, SeedableRng,
};
use std::collections::VecDeque;

use crate::error::{Result, SearchError};

/// A wrapper around the `rand` crate's `StdRng`.
///
/// The controller owns one instance; all parent selection happens on the
/// coordinating thread, so no synchronisation is needed.
#[derive(Clone, Debug)]
pub struct RandomNumberGenerator {
    pub rng: StdRng,
}

impl RandomNumberGenerator {
    /// Creates a new `RandomNumberGenerator` instance seeded from the system entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a new `RandomNumberGenerator` instance with a specific seed.
    ///
    /// This is useful for reproducible runs and tests.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates `num` random floating-point numbers in `[from, to)`.
    pub fn fetch_uniform(&mut self, from: f32, to: f32, num: usize) -> VecDeque<f32> {
        let mut uniform_numbers = VecDeque::with_capacity(num);
        uniform_numbers.extend((0..num).map(|_| self.rng.gen_range(from..to)));
        uniform_numbers
    }

    /// Returns a uniformly distributed index in `0..upper`.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::RandomGeneration` if `upper` is zero.
    pub fn gen_index(&mut self, upper: usize) -> Result<usize> {
        if upper == 0 {
            return Err(SearchError::RandomGeneration(
                "Cannot draw an index from an empty range".to_string(),
            ));
        }
        Ok(self.rng.gen_range(0..upper))
    }

    /// Draws `amount` distinct indices from `0..length`.
    ///
    /// If `amount` exceeds `length`, all indices are returned in random order.
    pub fn sample_indices(&mut self, length: usize, amount: usize) -> Vec<usize> {
        index::sample(&mut self.rng, length, amount.min(length)).into_vec()
    }

    /// Draws an index with probability proportional to `weights`.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::RandomGeneration` if the weights are empty, negative,
    /// non-finite or all zero.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Result<usize> {
        let distribution = WeightedIndex::new(weights).map_err(|e| {
            SearchError::RandomGeneration(format!("Invalid selection weights: {}", e))
        })?;
        Ok(distribution.sample(&mut self.rng))
    }
}

impl Default for RandomNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}
