use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::rng::RandomNumberGenerator;
use crate::selection::draw_without_replacement;
use crate::selection::parent_selection::{pool_fitness, ParentSelection};

/// Softmax weights `exp(f / temperature)`, normalised to sum to one.
///
/// The largest fitness is subtracted first so large scores cannot overflow.
/// A non-positive temperature degenerates to picking the maximum.
pub fn boltzmann_weights(fitness: &[f64], temperature: f64) -> Vec<f64> {
    if fitness.is_empty() {
        return Vec::new();
    }
    let max = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if temperature.is_nan() || temperature <= 0.0 || !max.is_finite() {
        let winners = fitness.iter().filter(|&&f| f == max).count().max(1) as f64;
        return fitness
            .iter()
            .map(|&f| if f == max { 1.0 / winners } else { 0.0 })
            .collect();
    }

    let exp: Vec<f64> = fitness
        .iter()
        .map(|&f| ((f - max) / temperature).exp())
        .collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Fitness-weighted selection with a softmax temperature.
///
/// Low temperatures concentrate on the best candidates, high temperatures
/// approach uniform selection.
#[derive(Debug, Clone)]
pub struct BoltzmannSelection {
    temperature: f64,
}

impl BoltzmannSelection {
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` unless `temperature` is positive
    /// and finite.
    pub fn new(temperature: f64) -> Result<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(SearchError::Configuration(
                "Boltzmann temperature must be a positive number".to_string(),
            ));
        }
        Ok(Self { temperature })
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl ParentSelection for BoltzmannSelection {
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

        let weights = boltzmann_weights(&pool_fitness(pool, direction), self.temperature);
        let drawn = draw_without_replacement(&weights, amount, rng)?;

        Ok(drawn.into_iter().map(|i| pool[i]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let weights = boltzmann_weights(&[1.0, 2.0, 3.0], 0.5);
        let sum: f64 = weights.iter().sum();

        assert!((sum - 1.0).abs() < 1e-12);
        assert!(weights[2] > weights[1] && weights[1] > weights[0]);
    }

    #[test]
    fn test_large_fitness_does_not_overflow() {
        let weights = boltzmann_weights(&[1e6, 1e6 - 1.0], 0.1);
        assert!(weights.iter().all(|w| w.is_finite()));
        assert!(weights[0] > 0.99);
    }

    #[test]
    fn test_zero_temperature_is_argmax() {
        assert_eq!(boltzmann_weights(&[1.0, 5.0, 5.0], 0.0), vec![0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_invalid_temperature() {
        assert!(BoltzmannSelection::new(0.0).is_err());
        assert!(BoltzmannSelection::new(f64::NAN).is_err());
        assert_eq!(BoltzmannSelection::new(0.3).unwrap().temperature(), 0.3);
    }
}
