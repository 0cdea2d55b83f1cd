//! # Evolution of Heuristics
//!
//! A population-based method. Candidates are clustered by a structural
//! signature of their code so that near-duplicates compete with each other
//! instead of crowding out different ideas. Each prompt applies one of four
//! operators, picked by configurable weights:
//!
//! - `E1`: a new algorithm with a totally different form from `k` parents;
//! - `E2`: a new algorithm built on the common backbone of `k` parents;
//! - `M1`: a modified version of one parent;
//! - `M2`: one parent with retuned parameters.
//!
//! Parents are drawn by first picking distinct clusters (by the selection
//! policy applied to each cluster's best member) and then one member inside
//! each picked cluster. With fewer clusters than parents, the remaining slots
//! are filled from the rest of the population. Crossover needs
//! `crossover_parents` distinct candidates; a smaller population gets a
//! mutation operator instead.
//!
//! ## Example
//!
//! ```rust
//! use heurist::candidate::Direction;
//! use heurist::method::{EvolutionOfHeuristics, SearchMethod};
//! use heurist::selection::SelectionKind;
//!
//! let method = EvolutionOfHeuristics::builder()
//!     .direction(Direction::Minimize)
//!     .population_size(8)
//!     .selection(SelectionKind::Roulette)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(method.generation_size(), 8);
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::population::{Insertion, Population, SignatureKind};
use crate::rng::RandomNumberGenerator;
use crate::sampler::Operator;
use crate::selection::{ParentSelection, SelectionKind};

use super::{SearchMethod, Selection};

/// Relative weights of the four operators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorWeights {
    pub e1: f64,
    pub e2: f64,
    pub m1: f64,
    pub m2: f64,
}

impl Default for OperatorWeights {
    fn default() -> Self {
        Self {
            e1: 1.0,
            e2: 1.0,
            m1: 1.0,
            m2: 1.0,
        }
    }
}

impl OperatorWeights {
    const OPERATORS: [Operator; 4] = [Operator::E1, Operator::E2, Operator::M1, Operator::M2];

    fn as_array(&self) -> [f64; 4] {
        [self.e1, self.e2, self.m1, self.m2]
    }

    fn validate(&self) -> Result<()> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SearchError::Configuration(
                "Operator weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(SearchError::Configuration(
                "At least one operator weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct EvolutionOfHeuristics {
    population: Population,
    population_size: usize,
    crossover_parents: usize,
    max_clusters: Option<usize>,
    selection: Box<dyn ParentSelection>,
    operator_weights: OperatorWeights,
}

impl EvolutionOfHeuristics {
    pub fn builder() -> EvolutionOfHeuristicsBuilder {
        EvolutionOfHeuristicsBuilder::default()
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    fn choose_operator(&self, rng: &mut RandomNumberGenerator) -> Result<Operator> {
        let index = rng.choose_weighted(&self.operator_weights.as_array())?;
        let operator = OperatorWeights::OPERATORS[index];

        if operator.is_crossover() && self.population.len() < self.crossover_parents {
            let mutation = [self.operator_weights.m1, self.operator_weights.m2];
            return Ok(match rng.choose_weighted(&mutation) {
                Ok(1) => Operator::M2,
                _ => Operator::M1,
            });
        }
        Ok(operator)
    }

    fn draw_parents(
        &self,
        amount: usize,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Vec<Candidate>> {
        let direction = self.population.direction();
        let clusters: Vec<_> = self.population.clusters().filter(|c| !c.is_empty()).collect();
        let representatives: Vec<&Candidate> =
            clusters.iter().filter_map(|c| c.best(direction)).collect();

        let picked = self
            .selection
            .select(&representatives, amount, direction, rng)?;

        let mut parents: Vec<&Candidate> = Vec::with_capacity(amount);
        for representative in picked {
            let Some(cluster) = clusters
                .iter()
                .find(|c| c.members().iter().any(|m| m.id() == representative.id()))
            else {
                continue;
            };
            let members: Vec<&Candidate> = cluster.members().iter().collect();
            if let Some(&member) = self.selection.select(&members, 1, direction, rng)?.first() {
                parents.push(member);
            }
        }

        if parents.len() < amount {
            let rest: Vec<&Candidate> = self
                .population
                .candidates()
                .filter(|c| parents.iter().all(|p| p.id() != c.id()))
                .collect();
            if !rest.is_empty() {
                let fill = self
                    .selection
                    .select(&rest, amount - parents.len(), direction, rng)?;
                parents.extend(fill);
            }
        }

        Ok(parents.into_iter().cloned().collect())
    }
}

impl SearchMethod for EvolutionOfHeuristics {
    fn name(&self) -> &'static str {
        "evolution_of_heuristics"
    }

    fn candidates(&self) -> Vec<&Candidate> {
        self.population.candidates().collect()
    }

    fn best(&self) -> Option<&Candidate> {
        self.population.best()
    }

    fn len(&self) -> usize {
        self.population.len()
    }

    fn select_parents(&mut self, rng: &mut RandomNumberGenerator) -> Result<Selection> {
        if self.population.is_empty() {
            return Err(SearchError::EmptyPopulation);
        }

        let operator = self.choose_operator(rng)?;
        let amount = if operator.is_crossover() {
            self.crossover_parents
        } else {
            1
        };
        let parents = self.draw_parents(amount, rng)?;
        if parents.is_empty() {
            return Err(SearchError::Selection(
                "Selection policy returned no parents".to_string(),
            ));
        }

        Ok(Selection {
            parents,
            operator,
            origin: None,
        })
    }

    fn insert(
        &mut self,
        candidate: Candidate,
        _rng: &mut RandomNumberGenerator,
    ) -> Result<Insertion> {
        let id = candidate.id();
        let outcome = self.population.insert(candidate)?;

        if let Some(limit) = self.max_clusters {
            while self.population.num_clusters() > limit {
                let Some(dropped) = self.population.remove_worst_cluster() else {
                    break;
                };
                debug!(members = dropped.len(), "dropped worst cluster");
                if dropped.iter().any(|c| c.id() == id) {
                    return Ok(Insertion::Rejected);
                }
            }
        }
        Ok(outcome)
    }

    fn generation_size(&self) -> usize {
        self.population_size
    }
}

/// Builder for [`EvolutionOfHeuristics`].
#[derive(Debug, Clone, Default)]
pub struct EvolutionOfHeuristicsBuilder {
    direction: Option<Direction>,
    cluster_capacity: Option<usize>,
    population_size: Option<usize>,
    crossover_parents: Option<usize>,
    max_clusters: Option<usize>,
    selection: Option<SelectionKind>,
    operator_weights: Option<OperatorWeights>,
    signature: Option<SignatureKind>,
}

impl EvolutionOfHeuristicsBuilder {
    pub fn direction(mut self, value: Direction) -> Self {
        self.direction = Some(value);
        self
    }

    /// Sets the capacity of each cluster.
    pub fn cluster_capacity(mut self, value: usize) -> Self {
        self.cluster_capacity = Some(value);
        self
    }

    /// Sets the number of sample attempts per generation.
    pub fn population_size(mut self, value: usize) -> Self {
        self.population_size = Some(value);
        self
    }

    pub fn crossover_parents(mut self, value: usize) -> Self {
        self.crossover_parents = Some(value);
        self
    }

    /// Bounds the number of clusters; `None` leaves it unbounded.
    pub fn max_clusters(mut self, value: Option<usize>) -> Self {
        self.max_clusters = value;
        self
    }

    pub fn selection(mut self, value: SelectionKind) -> Self {
        self.selection = Some(value);
        self
    }

    pub fn operator_weights(mut self, value: OperatorWeights) -> Self {
        self.operator_weights = Some(value);
        self
    }

    pub fn signature(mut self, value: SignatureKind) -> Self {
        self.signature = Some(value);
        self
    }

    /// # Errors
    ///
    /// Returns `SearchError::Configuration` for zero sizes, fewer than two
    /// crossover parents, or invalid selection parameters and weights.
    pub fn build(self) -> Result<EvolutionOfHeuristics> {
        let population_size = self.population_size.unwrap_or(10);
        if population_size == 0 {
            return Err(SearchError::Configuration(
                "Population size must be greater than zero".to_string(),
            ));
        }
        let crossover_parents = self.crossover_parents.unwrap_or(2);
        if crossover_parents < 2 {
            return Err(SearchError::Configuration(
                "Crossover needs at least two parents".to_string(),
            ));
        }
        if self.max_clusters == Some(0) {
            return Err(SearchError::Configuration(
                "Maximum number of clusters must be greater than zero".to_string(),
            ));
        }
        let operator_weights = self.operator_weights.unwrap_or_default();
        operator_weights.validate()?;

        Ok(EvolutionOfHeuristics {
            population: Population::new(
                self.cluster_capacity.unwrap_or(10),
                self.direction.unwrap_or_default(),
                self.signature.unwrap_or_default(),
            )?,
            population_size,
            crossover_parents,
            max_clusters: self.max_clusters,
            selection: self.selection.unwrap_or_default().build()?,
            operator_weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;
    use std::time::Duration;

    fn scored(id: u64, source: &str, score: f64) -> Candidate {
        Candidate::new(CandidateId(id), source, None, 0, vec![])
            .into_scored(score, Duration::ZERO)
            .unwrap()
    }

    fn sources() -> Vec<&'static str> {
        vec![
            "def f(x):\n    return x\n",
            "def f(x):\n    return x + 1\n",
            "def f(x):\n    return x * 2 - 1\n",
            "def f(x):\n    if x:\n        return 1\n    return 0\n",
        ]
    }

    #[test]
    fn test_single_candidate_forces_mutation() {
        let mut method = EvolutionOfHeuristics::builder()
            .operator_weights(OperatorWeights {
                e1: 1.0,
                e2: 0.0,
                m1: 0.0,
                m2: 1.0,
            })
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(4);
        method.seed(scored(0, sources()[0], 1.0), &mut rng).unwrap();

        for _ in 0..20 {
            let selection = method.select_parents(&mut rng).unwrap();
            assert_eq!(selection.operator, Operator::M2);
            assert_eq!(selection.parents.len(), 1);
        }
    }

    #[test]
    fn test_crossover_parents_are_distinct() {
        let mut method = EvolutionOfHeuristics::builder()
            .operator_weights(OperatorWeights {
                e1: 1.0,
                e2: 1.0,
                m1: 0.0,
                m2: 0.0,
            })
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(8);
        for (id, source) in sources().into_iter().enumerate() {
            method
                .insert(scored(id as u64, source, id as f64), &mut rng)
                .unwrap();
        }
        assert_eq!(method.population().num_clusters(), 4);

        for _ in 0..20 {
            let selection = method.select_parents(&mut rng).unwrap();
            assert!(selection.operator.is_crossover());
            assert_eq!(selection.parents.len(), 2);
            assert_ne!(selection.parents[0].id(), selection.parents[1].id());
            assert!(selection.parents.iter().all(|p| method.contains(p.id())));
        }
    }

    #[test]
    fn test_one_cluster_still_yields_two_parents() {
        let mut method = EvolutionOfHeuristics::builder()
            .operator_weights(OperatorWeights {
                e1: 1.0,
                e2: 0.0,
                m1: 0.0,
                m2: 0.0,
            })
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(2);
        method.insert(scored(1, "def f(x):\n    return x + 1\n", 1.0), &mut rng).unwrap();
        method.insert(scored(2, "def f(x):\n    return x + 7\n", 2.0), &mut rng).unwrap();
        assert_eq!(method.population().num_clusters(), 1);

        let selection = method.select_parents(&mut rng).unwrap();
        assert_eq!(selection.operator, Operator::E1);
        assert_eq!(selection.parents.len(), 2);
    }

    #[test]
    fn test_max_clusters_drops_worst() {
        let mut method = EvolutionOfHeuristics::builder()
            .direction(Direction::Maximize)
            .max_clusters(Some(2))
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(0);
        let all = sources();
        method.insert(scored(1, all[0], 5.0), &mut rng).unwrap();
        method.insert(scored(2, all[1], 7.0), &mut rng).unwrap();

        let outcome = method.insert(scored(3, all[3], 1.0), &mut rng).unwrap();
        assert_eq!(outcome, Insertion::Rejected);
        assert_eq!(method.population().num_clusters(), 2);

        method.insert(scored(4, all[3], 6.0), &mut rng).unwrap();
        assert!(!method.contains(CandidateId(1)));
        assert!(method.contains(CandidateId(4)));
    }

    #[test]
    fn test_empty_population_has_no_parents() {
        let mut method = EvolutionOfHeuristics::builder().build().unwrap();
        let mut rng = RandomNumberGenerator::from_seed(0);
        assert!(matches!(method.select_parents(&mut rng), Err(SearchError::EmptyPopulation)));
    }

    #[test]
    fn test_builder_validation() {
        assert!(EvolutionOfHeuristics::builder().population_size(0).build().is_err());
        assert!(EvolutionOfHeuristics::builder().crossover_parents(1).build().is_err());
        assert!(EvolutionOfHeuristics::builder()
            .operator_weights(OperatorWeights {
                e1: 0.0,
                e2: 0.0,
                m1: 0.0,
                m2: 0.0
            })
            .build()
            .is_err());
    }
}
