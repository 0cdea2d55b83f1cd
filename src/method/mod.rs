//! # Search Methods
//!
//! A search method owns the population and decides three things: which
//! parents the next prompt is built from ([`SearchMethod::select_parents`]),
//! what the prompt says ([`SearchMethod::build_prompt_context`]) and what
//! happens to a freshly scored candidate ([`SearchMethod::insert`]). The
//! controller is written once against this trait.
//!
//! | method | store | parents | insertion |
//! |---|---|---|---|
//! | [`RandomSampling`] | one bounded buffer | none | unconditional, capacity-bounded |
//! | [`HillClimbing`] | one incumbent per lane | the lane's incumbent | replace iff strictly better |
//! | [`EvolutionOfHeuristics`] | clusters by code structure | several, fitness-weighted | into its own cluster |
//! | [`FunSearch`] | islands, clusters by score | up to `functions_per_prompt` from one island | into its origin island |
//!
//! Methods are configured through the serialisable [`MethodConfig`].

pub mod eoh;
pub mod funsearch;
pub mod hill_climbing;
pub mod random;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, CandidateId, Direction};
use crate::error::Result;
use crate::population::{Insertion, SignatureKind};
use crate::rng::RandomNumberGenerator;
use crate::sampler::prompt::{self, Operator, Prompt};
use crate::selection::SelectionKind;
use crate::task::TaskSpec;

pub use eoh::{EvolutionOfHeuristics, OperatorWeights};
pub use funsearch::FunSearch;
pub use hill_climbing::HillClimbing;
pub use random::RandomSampling;

/// Parents chosen for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub parents: Vec<Candidate>,
    pub operator: Operator,
    /// Lane or island the parents come from.
    pub origin: Option<usize>,
}

impl Selection {
    /// A parent-less request for an independent solution.
    pub fn fresh() -> Self {
        Self {
            parents: Vec::new(),
            operator: Operator::Fresh,
            origin: None,
        }
    }

    pub fn parent_ids(&self) -> Vec<CandidateId> {
        self.parents.iter().map(Candidate::id).collect()
    }
}

/// The contract every search method implements.
pub trait SearchMethod: Debug + Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Every stored candidate.
    fn candidates(&self) -> Vec<&Candidate>;

    /// Best stored candidate.
    fn best(&self) -> Option<&Candidate>;

    fn len(&self) -> usize {
        self.candidates().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: CandidateId) -> bool {
        self.candidates().iter().any(|c| c.id() == id)
    }

    /// Chooses the parents and operator of the next prompt.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::EmptyPopulation` if the method needs parents and
    /// holds none; the controller then falls back to [`Selection::fresh`].
    fn select_parents(&mut self, rng: &mut RandomNumberGenerator) -> Result<Selection>;

    /// Builds the prompt for `selection`.
    fn build_prompt_context(&self, task: &TaskSpec, selection: &Selection) -> Prompt {
        let parents: Vec<&Candidate> = selection.parents.iter().collect();
        let text = match selection.operator {
            Operator::Fresh => prompt::fresh(task),
            Operator::Improve => match parents.first() {
                Some(parent) => prompt::improve(task, parent),
                None => prompt::fresh(task),
            },
            Operator::Continue => prompt::continuation(task, &parents),
            operator => prompt::evolution(task, operator, &parents),
        };
        Prompt::new(text, selection.operator, &parents, selection.origin)
    }

    /// Offers a scored candidate to the store.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Evaluation` if the candidate is unscored.
    fn insert(
        &mut self,
        candidate: Candidate,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Insertion>;

    /// Registers the initial candidate. By default this is an ordinary
    /// insertion.
    ///
    /// # Errors
    ///
    /// As [`SearchMethod::insert`].
    fn seed(&mut self, candidate: Candidate, rng: &mut RandomNumberGenerator) -> Result<Insertion> {
        self.insert(candidate, rng)
    }

    /// Number of sample attempts that make up one generation.
    fn generation_size(&self) -> usize {
        1
    }
}

/// Serialisable method choice and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MethodConfig {
    RandomSampling,
    HillClimbing {
        #[serde(default = "default_lanes")]
        lanes: usize,
    },
    EvolutionOfHeuristics {
        #[serde(default = "default_population_size")]
        population_size: usize,
        #[serde(default = "default_crossover_parents")]
        crossover_parents: usize,
        #[serde(default)]
        max_clusters: Option<usize>,
        #[serde(default)]
        selection: SelectionKind,
        #[serde(default)]
        operator_weights: OperatorWeights,
        #[serde(default)]
        signature: SignatureKind,
    },
    FunSearch {
        #[serde(default = "default_num_islands")]
        num_islands: usize,
        #[serde(default = "default_functions_per_prompt")]
        functions_per_prompt: usize,
        #[serde(default = "default_reset_period")]
        reset_period: Option<usize>,
        #[serde(default = "default_temperature_init")]
        temperature_init: f64,
        #[serde(default = "default_temperature_period")]
        temperature_period: usize,
        #[serde(default = "default_score_decimals")]
        score_decimals: u32,
    },
}

fn default_lanes() -> usize {
    1
}

fn default_population_size() -> usize {
    10
}

fn default_crossover_parents() -> usize {
    2
}

fn default_num_islands() -> usize {
    10
}

fn default_functions_per_prompt() -> usize {
    2
}

fn default_reset_period() -> Option<usize> {
    Some(100)
}

fn default_temperature_init() -> f64 {
    0.1
}

fn default_temperature_period() -> usize {
    30_000
}

fn default_score_decimals() -> u32 {
    4
}

impl Default for MethodConfig {
    fn default() -> Self {
        MethodConfig::HillClimbing {
            lanes: default_lanes(),
        }
    }
}

impl MethodConfig {
    /// Default evolution-of-heuristics parameters.
    pub fn evolution_of_heuristics() -> Self {
        MethodConfig::EvolutionOfHeuristics {
            population_size: default_population_size(),
            crossover_parents: default_crossover_parents(),
            max_clusters: None,
            selection: SelectionKind::default(),
            operator_weights: OperatorWeights::default(),
            signature: SignatureKind::default(),
        }
    }

    /// Default FunSearch parameters.
    pub fn fun_search() -> Self {
        MethodConfig::FunSearch {
            num_islands: default_num_islands(),
            functions_per_prompt: default_functions_per_prompt(),
            reset_period: default_reset_period(),
            temperature_init: default_temperature_init(),
            temperature_period: default_temperature_period(),
            score_decimals: default_score_decimals(),
        }
    }

    /// Instantiates the method for a run.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` for invalid parameters.
    pub fn build(
        &self,
        direction: Direction,
        cluster_capacity: usize,
    ) -> Result<Box<dyn SearchMethod>> {
        Ok(match self {
            MethodConfig::RandomSampling => {
                Box::new(RandomSampling::new(direction, cluster_capacity)?)
            }
            MethodConfig::HillClimbing { lanes } => Box::new(HillClimbing::new(direction, *lanes)?),
            MethodConfig::EvolutionOfHeuristics {
                population_size,
                crossover_parents,
                max_clusters,
                selection,
                operator_weights,
                signature,
            } => Box::new(
                EvolutionOfHeuristics::builder()
                    .direction(direction)
                    .cluster_capacity(cluster_capacity)
                    .population_size(*population_size)
                    .crossover_parents(*crossover_parents)
                    .max_clusters(*max_clusters)
                    .selection(*selection)
                    .operator_weights(*operator_weights)
                    .signature(*signature)
                    .build()?,
            ),
            MethodConfig::FunSearch {
                num_islands,
                functions_per_prompt,
                reset_period,
                temperature_init,
                temperature_period,
                score_decimals,
            } => Box::new(
                FunSearch::builder()
                    .direction(direction)
                    .cluster_capacity(cluster_capacity)
                    .num_islands(*num_islands)
                    .functions_per_prompt(*functions_per_prompt)
                    .reset_period(*reset_period)
                    .temperature(*temperature_init, *temperature_period)
                    .score_decimals(*score_decimals)
                    .build()?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_config_json() {
        let config: MethodConfig =
            serde_json::from_str(r#"{"method":"hill_climbing","lanes":3}"#).unwrap();
        assert_eq!(config, MethodConfig::HillClimbing { lanes: 3 });

        let config: MethodConfig = serde_json::from_str(r#"{"method":"fun_search"}"#).unwrap();
        assert_eq!(config, MethodConfig::fun_search());

        let config: MethodConfig =
            serde_json::from_str(r#"{"method":"evolution_of_heuristics","population_size":4}"#)
                .unwrap();
        match config {
            MethodConfig::EvolutionOfHeuristics {
                population_size,
                crossover_parents,
                ..
            } => {
                assert_eq!(population_size, 4);
                assert_eq!(crossover_parents, 2);
            }
            other => panic!("Expected EoH config, got {:?}", other),
        }
    }

    #[test]
    fn test_build_each_method() {
        let configs = [
            MethodConfig::RandomSampling,
            MethodConfig::default(),
            MethodConfig::evolution_of_heuristics(),
            MethodConfig::fun_search(),
        ];
        let names: Vec<&str> = configs
            .iter()
            .map(|c| c.build(Direction::Maximize, 5).unwrap().name())
            .collect();

        assert_eq!(
            names,
            ["random_sampling", "hill_climbing", "evolution_of_heuristics", "fun_search"]
        );
    }

    #[test]
    fn test_build_rejects_zero_lanes() {
        assert!(MethodConfig::HillClimbing { lanes: 0 }
            .build(Direction::Minimize, 5)
            .is_err());
    }
}
