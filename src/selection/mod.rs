//! # Parent Selection
//!
//! Selection policies draw distinct parents from a pool of scored candidates.
//! All policies are direction-aware: for a minimisation task the lowest score
//! is the fittest.
//!
//! | policy | weight of a candidate |
//! |---|---|
//! | [`RouletteWheelSelection`] | proportional to its fitness, shifted so the worst keeps a small share |
//! | [`RankBasedSelection`] | linear in its rank, with configurable pressure |
//! | [`UniformSelection`] | equal |
//! | [`BoltzmannSelection`] | `exp(fitness / temperature)` |
//!
//! Selection is without replacement: asking for more parents than the pool
//! holds returns the whole pool in selection order.

pub mod boltzmann;
pub mod parent_selection;
pub mod rank;
pub mod roulette;
pub mod uniform;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};
use crate::rng::RandomNumberGenerator;

pub use boltzmann::{boltzmann_weights, BoltzmannSelection};
pub use parent_selection::ParentSelection;
pub use rank::RankBasedSelection;
pub use roulette::RouletteWheelSelection;
pub use uniform::UniformSelection;

/// Serialisable choice of selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionKind {
    Roulette,
    Rank {
        #[serde(default = "default_pressure")]
        pressure: f64,
    },
    Uniform,
    Boltzmann {
        temperature: f64,
    },
}

fn default_pressure() -> f64 {
    1.5
}

impl Default for SelectionKind {
    fn default() -> Self {
        SelectionKind::Rank {
            pressure: default_pressure(),
        }
    }
}

impl SelectionKind {
    /// Instantiates the policy.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` for an out-of-range pressure or a
    /// non-positive temperature.
    pub fn build(&self) -> Result<Box<dyn ParentSelection>> {
        Ok(match *self {
            SelectionKind::Roulette => Box::new(RouletteWheelSelection::new()),
            SelectionKind::Rank { pressure } => Box::new(RankBasedSelection::new(pressure)?),
            SelectionKind::Uniform => Box::new(UniformSelection),
            SelectionKind::Boltzmann { temperature } => {
                Box::new(BoltzmannSelection::new(temperature)?)
            }
        })
    }
}

/// Draws up to `amount` distinct indices, each draw proportional to the
/// weights of the indices not drawn yet.
///
/// # Errors
///
/// Returns `SearchError::RandomGeneration` if a weight is negative or not
/// finite.
pub fn draw_without_replacement(
    weights: &[f64],
    amount: usize,
    rng: &mut RandomNumberGenerator,
) -> Result<Vec<usize>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(SearchError::RandomGeneration(
            "Selection weights must be finite and non-negative".to_string(),
        ));
    }

    let mut remaining: Vec<usize> = (0..weights.len()).collect();
    let mut drawn = Vec::with_capacity(amount.min(weights.len()));

    while drawn.len() < amount && !remaining.is_empty() {
        let sum: f64 = remaining.iter().map(|&i| weights[i]).sum();
        let position = if sum <= 0.0 {
            rng.gen_index(remaining.len())?
        } else {
            let r = rng
                .fetch_uniform(0.0, 1.0, 1)
                .front()
                .map(|&v| v as f64 * sum)
                .ok_or_else(|| {
                    SearchError::RandomGeneration(
                        "Failed to generate random value for selection".to_string(),
                    )
                })?;
            let mut cumulative = 0.0;
            remaining
                .iter()
                .position(|&i| {
                    cumulative += weights[i];
                    r < cumulative
                })
                .unwrap_or(remaining.len() - 1)
        };
        drawn.push(remaining.remove(position));
    }

    Ok(drawn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_without_replacement_is_distinct() {
        let mut rng = RandomNumberGenerator::from_seed(5);
        let mut drawn = draw_without_replacement(&[1.0, 2.0, 3.0], 10, &mut rng).unwrap();
        drawn.sort_unstable();

        assert_eq!(drawn, vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_weight_drawn_last() {
        let mut rng = RandomNumberGenerator::from_seed(9);
        for _ in 0..20 {
            let drawn = draw_without_replacement(&[0.0, 1.0], 1, &mut rng).unwrap();
            assert_eq!(drawn, vec![1]);
        }
    }

    #[test]
    fn test_negative_weight_is_error() {
        let mut rng = RandomNumberGenerator::from_seed(1);
        assert!(draw_without_replacement(&[1.0, -1.0], 1, &mut rng).is_err());
    }

    #[test]
    fn test_kind_builds_and_validates() {
        assert!(SelectionKind::default().build().is_ok());
        assert!(SelectionKind::Rank { pressure: 3.0 }.build().is_err());
        assert!(SelectionKind::Boltzmann { temperature: 0.0 }.build().is_err());

        let kind: SelectionKind = serde_json::from_str(r#"{"kind":"rank"}"#).unwrap();
        assert_eq!(kind, SelectionKind::Rank { pressure: 1.5 });
    }
}
