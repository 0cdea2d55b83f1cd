//! # FunSearch
//!
//! An island model. Each island is an independent population whose clusters
//! group candidates with the same (rounded) score. A prompt is built from one
//! island:
//!
//! 1. an island holding candidates is chosen uniformly;
//! 2. up to `functions_per_prompt` clusters are drawn by Boltzmann sampling
//!    over each cluster's best fitness, with a temperature that decays from
//!    `temperature_init` to zero over `temperature_period` programs registered
//!    on the island since it was last reset, and then restarts;
//! 3. inside each cluster, shorter programs are preferred;
//! 4. the chosen programs are shown worst to best as `<name>_v0, <name>_v1, ..`
//!    and the model completes the next version.
//!
//! A scored candidate returns to the island its parents came from. Every
//! `reset_period` insertions the worse half of the islands is wiped and each
//! wiped island is reseeded with the best candidate of a random surviving
//! island.

use tracing::{debug, info};

use crate::candidate::{Candidate, Direction};
use crate::error::{Result, SearchError};
use crate::population::{Insertion, Population, SignatureKind};
use crate::rng::RandomNumberGenerator;
use crate::sampler::Operator;
use crate::selection::{boltzmann_weights, draw_without_replacement};

use super::{SearchMethod, Selection};

#[derive(Debug, Clone)]
pub struct FunSearch {
    islands: Vec<Population>,
    /// Programs offered to each island since it was created or reset,
    /// rejected and evicted ones included.
    registered: Vec<usize>,
    direction: Direction,
    functions_per_prompt: usize,
    reset_period: Option<usize>,
    temperature_init: f64,
    temperature_period: usize,
    insertions_since_reset: usize,
}

impl FunSearch {
    pub fn builder() -> FunSearchBuilder {
        FunSearchBuilder::default()
    }

    pub fn islands(&self) -> &[Population] {
        &self.islands
    }

    pub fn registered(&self) -> &[usize] {
        &self.registered
    }

    /// Cluster sampling temperature after `registered` programs.
    pub fn temperature(&self, registered: usize) -> f64 {
        let period = self.temperature_period as f64;
        let phase = (registered % self.temperature_period) as f64;
        self.temperature_init * (1.0 - phase / period)
    }

    /// Current cluster sampling temperature of `island`.
    pub fn island_temperature(&self, island: usize) -> Option<f64> {
        self.registered.get(island).map(|&n| self.temperature(n))
    }

    fn register(&mut self, island: usize, candidate: Candidate) -> Result<Insertion> {
        self.registered[island] += 1;
        self.islands[island].insert(candidate)
    }

    fn island_fitness(&self, island: &Population) -> Option<f64> {
        island
            .best()
            .and_then(Candidate::score)
            .map(|s| self.direction.fitness(s))
    }

    /// Wipes the worse half of the islands and reseeds them from survivors.
    pub fn reset_islands(&mut self, rng: &mut RandomNumberGenerator) -> Result<()> {
        let mut order: Vec<usize> = (0..self.islands.len()).collect();
        order.sort_by(|&a, &b| {
            let fa = self.island_fitness(&self.islands[a]).unwrap_or(f64::NEG_INFINITY);
            let fb = self.island_fitness(&self.islands[b]).unwrap_or(f64::NEG_INFINITY);
            fa.partial_cmp(&fb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.cmp(&a))
        });

        let wiped = self.islands.len() / 2;
        let (reset, survivors) = order.split_at(wiped);
        let survivors: Vec<usize> = survivors
            .iter()
            .copied()
            .filter(|&i| !self.islands[i].is_empty())
            .collect();

        for &island in reset {
            self.islands[island].clear();
            self.registered[island] = 0;
            if survivors.is_empty() {
                continue;
            }
            let donor = survivors[rng.gen_index(survivors.len())?];
            if let Some(founder) = self.islands[donor].best().cloned() {
                self.register(island, founder)?;
            }
        }

        info!(islands = wiped, "reset worst islands");
        Ok(())
    }
}

impl SearchMethod for FunSearch {
    fn name(&self) -> &'static str {
        "fun_search"
    }

    fn candidates(&self) -> Vec<&Candidate> {
        let mut seen: Vec<&Candidate> = Vec::new();
        for candidate in self.islands.iter().flat_map(|island| island.candidates()) {
            if seen.iter().all(|c| c.id() != candidate.id()) {
                seen.push(candidate);
            }
        }
        seen
    }

    fn best(&self) -> Option<&Candidate> {
        self.islands
            .iter()
            .filter_map(|island| island.best())
            .max_by(|a, b| a.compare(b, self.direction))
    }

    fn select_parents(&mut self, rng: &mut RandomNumberGenerator) -> Result<Selection> {
        let populated: Vec<usize> = (0..self.islands.len())
            .filter(|&i| !self.islands[i].is_empty())
            .collect();
        if populated.is_empty() {
            return Err(SearchError::EmptyPopulation);
        }
        let island_index = populated[rng.gen_index(populated.len())?];
        let island = &self.islands[island_index];

        let clusters: Vec<_> = island.clusters().filter(|c| !c.is_empty()).collect();
        let fitness: Vec<f64> = clusters
            .iter()
            .map(|c| {
                c.best(self.direction)
                    .and_then(Candidate::score)
                    .map(|s| self.direction.fitness(s))
                    .unwrap_or(f64::NEG_INFINITY)
            })
            .collect();
        let weights = boltzmann_weights(&fitness, self.temperature(self.registered[island_index]));
        let picked = draw_without_replacement(&weights, self.functions_per_prompt, rng)?;

        let mut parents = Vec::with_capacity(picked.len());
        for cluster_index in picked {
            let members = clusters[cluster_index].members();
            let lengths: Vec<f64> = members.iter().map(|m| m.length() as f64).collect();
            let min = lengths.iter().copied().fold(f64::INFINITY, f64::min);
            let max = lengths.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let shortness: Vec<f64> = lengths
                .iter()
                .map(|l| -(l - min) / (max + 1e-6))
                .collect();
            let choice = draw_without_replacement(&boltzmann_weights(&shortness, 1.0), 1, rng)?;
            if let Some(&member) = choice.first() {
                parents.push(members[member].clone());
            }
        }

        parents.sort_by(|a, b| a.compare(b, self.direction));
        debug!(island = island_index, parents = parents.len(), "selected parents");

        Ok(Selection {
            parents,
            operator: Operator::Continue,
            origin: Some(island_index),
        })
    }

    /// A candidate without an origin island (the seed, a bootstrap sample) is
    /// registered in every island.
    fn insert(
        &mut self,
        candidate: Candidate,
        rng: &mut RandomNumberGenerator,
    ) -> Result<Insertion> {
        let outcome = match candidate.origin() {
            Some(island) if island < self.islands.len() => self.register(island, candidate)?,
            _ => {
                let mut outcome = Insertion::Rejected;
                for island in 0..self.islands.len() {
                    let result = self.register(island, candidate.clone())?;
                    if outcome == Insertion::Rejected {
                        outcome = result;
                    }
                }
                outcome
            }
        };

        self.insertions_since_reset += 1;
        if let Some(period) = self.reset_period {
            if self.insertions_since_reset >= period {
                self.insertions_since_reset = 0;
                self.reset_islands(rng)?;
            }
        }
        Ok(outcome)
    }
}

/// Builder for [`FunSearch`].
#[derive(Debug, Clone, Default)]
pub struct FunSearchBuilder {
    direction: Option<Direction>,
    cluster_capacity: Option<usize>,
    num_islands: Option<usize>,
    functions_per_prompt: Option<usize>,
    reset_period: Option<Option<usize>>,
    temperature: Option<(f64, usize)>,
    score_decimals: Option<u32>,
}

impl FunSearchBuilder {
    pub fn direction(mut self, value: Direction) -> Self {
        self.direction = Some(value);
        self
    }

    pub fn cluster_capacity(mut self, value: usize) -> Self {
        self.cluster_capacity = Some(value);
        self
    }

    pub fn num_islands(mut self, value: usize) -> Self {
        self.num_islands = Some(value);
        self
    }

    pub fn functions_per_prompt(mut self, value: usize) -> Self {
        self.functions_per_prompt = Some(value);
        self
    }

    /// Insertions between island resets; `None` disables resets.
    pub fn reset_period(mut self, value: Option<usize>) -> Self {
        self.reset_period = Some(value);
        self
    }

    /// Sets the initial cluster temperature and the period of its decay.
    pub fn temperature(mut self, init: f64, period: usize) -> Self {
        self.temperature = Some((init, period));
        self
    }

    /// Decimals kept when clustering by score.
    pub fn score_decimals(mut self, value: u32) -> Self {
        self.score_decimals = Some(value);
        self
    }

    /// # Errors
    ///
    /// Returns `SearchError::Configuration` for zero sizes or periods and a
    /// negative or non-finite temperature.
    pub fn build(self) -> Result<FunSearch> {
        let num_islands = self.num_islands.unwrap_or(10);
        let functions_per_prompt = self.functions_per_prompt.unwrap_or(2);
        let reset_period = self.reset_period.unwrap_or(Some(100));
        let (temperature_init, temperature_period) = self.temperature.unwrap_or((0.1, 30_000));

        if num_islands == 0 || functions_per_prompt == 0 {
            return Err(SearchError::Configuration(
                "FunSearch needs at least one island and one function per prompt".to_string(),
            ));
        }
        if reset_period == Some(0) || temperature_period == 0 {
            return Err(SearchError::Configuration(
                "FunSearch periods must be greater than zero".to_string(),
            ));
        }
        if !temperature_init.is_finite() || temperature_init < 0.0 {
            return Err(SearchError::Configuration(
                "FunSearch temperature must be a non-negative number".to_string(),
            ));
        }

        let direction = self.direction.unwrap_or_default();
        let signature = SignatureKind::Score {
            decimals: self.score_decimals.unwrap_or(4),
        };
        let capacity = self.cluster_capacity.unwrap_or(10);
        let islands = (0..num_islands)
            .map(|_| Population::new(capacity, direction, signature))
            .collect::<Result<Vec<_>>>()?;

        Ok(FunSearch {
            registered: vec![0; islands.len()],
            islands,
            direction,
            functions_per_prompt,
            reset_period,
            temperature_init,
            temperature_period,
            insertions_since_reset: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;
    use std::time::Duration;

    fn scored(id: u64, score: f64, origin: Option<usize>) -> Candidate {
        let source = format!("def f(x):\n    return x + {}\n", id);
        Candidate::new(CandidateId(id), source, None, 0, vec![])
            .with_origin(origin)
            .into_scored(score, Duration::ZERO)
            .unwrap()
    }

    #[test]
    fn test_seed_registered_in_every_island() {
        let mut method = FunSearch::builder().num_islands(3).build().unwrap();
        let mut rng = RandomNumberGenerator::from_seed(0);
        method.seed(scored(0, 1.0, None), &mut rng).unwrap();

        assert!(method.islands().iter().all(|island| island.len() == 1));
        assert_eq!(method.len(), 1);
    }

    #[test]
    fn test_parents_sorted_worst_to_best() {
        let mut method = FunSearch::builder()
            .num_islands(1)
            .direction(Direction::Minimize)
            .temperature(100.0, 1000)
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(5);
        for (id, score) in [(1, 3.0), (2, 1.0), (3, 2.0)] {
            method.insert(scored(id, score, Some(0)), &mut rng).unwrap();
        }

        for _ in 0..20 {
            let selection = method.select_parents(&mut rng).unwrap();
            assert_eq!(selection.operator, Operator::Continue);
            assert_eq!(selection.origin, Some(0));
            assert_eq!(selection.parents.len(), 2);
            let scores: Vec<f64> = selection.parents.iter().filter_map(|p| p.score()).collect();
            assert!(scores[0] > scores[1]);
        }
    }

    #[test]
    fn test_insert_targets_origin_island() {
        let mut method = FunSearch::builder().num_islands(2).build().unwrap();
        let mut rng = RandomNumberGenerator::from_seed(0);
        method.insert(scored(4, 2.0, Some(1)), &mut rng).unwrap();

        assert!(method.islands()[0].is_empty());
        assert!(method.islands()[1].contains(CandidateId(4)));
    }

    #[test]
    fn test_reset_reseeds_worst_half() {
        let mut method = FunSearch::builder()
            .num_islands(4)
            .reset_period(Some(4))
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(3);
        method.insert(scored(1, 1.0, Some(0)), &mut rng).unwrap();
        method.insert(scored(2, 2.0, Some(1)), &mut rng).unwrap();
        method.insert(scored(3, 3.0, Some(2)), &mut rng).unwrap();
        method.insert(scored(4, 4.0, Some(3)), &mut rng).unwrap();

        let islands = method.islands();
        assert!(!islands[0].contains(CandidateId(1)));
        assert!(!islands[1].contains(CandidateId(2)));
        for island in &islands[..2] {
            let founder = island.best().unwrap().id();
            assert!(founder == CandidateId(3) || founder == CandidateId(4));
        }
        assert!(islands[2].contains(CandidateId(3)));
        assert!(islands[3].contains(CandidateId(4)));
    }

    #[test]
    fn test_temperature_decays_and_restarts() {
        let method = FunSearch::builder().temperature(0.1, 10).build().unwrap();
        assert!((method.temperature(0) - 0.1).abs() < 1e-12);
        assert!((method.temperature(5) - 0.05).abs() < 1e-12);
        assert!((method.temperature(10) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_follows_registrations_not_stored_programs() {
        let mut method = FunSearch::builder()
            .num_islands(2)
            .cluster_capacity(1)
            .reset_period(None)
            .temperature(0.1, 10)
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(0);
        for id in 0..4 {
            method.insert(scored(id, 1.0, Some(0)), &mut rng).unwrap();
        }

        assert_eq!(method.islands()[0].len(), 1);
        assert_eq!(method.registered(), &[4, 0]);
        assert!((method.island_temperature(0).unwrap() - 0.06).abs() < 1e-12);
        assert!((method.island_temperature(1).unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(method.island_temperature(2), None);
    }

    #[test]
    fn test_reset_restarts_registration_count() {
        let mut method = FunSearch::builder()
            .direction(Direction::Maximize)
            .num_islands(2)
            .reset_period(Some(3))
            .build()
            .unwrap();
        let mut rng = RandomNumberGenerator::from_seed(1);
        method.insert(scored(1, 1.0, Some(0)), &mut rng).unwrap();
        method.insert(scored(2, 1.5, Some(0)), &mut rng).unwrap();
        method.insert(scored(3, 5.0, Some(1)), &mut rng).unwrap();

        // Island 0 was wiped and reseeded with the founder from island 1.
        assert_eq!(method.registered(), &[1, 1]);
        assert!(method.islands()[0].contains(CandidateId(3)));
    }

    #[test]
    fn test_builder_validation() {
        assert!(FunSearch::builder().num_islands(0).build().is_err());
        assert!(FunSearch::builder().reset_period(Some(0)).build().is_err());
        assert!(FunSearch::builder().temperature(-1.0, 10).build().is_err());
    }
}
