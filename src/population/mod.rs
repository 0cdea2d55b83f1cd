//! # Population Store
//!
//! A `Population` maps [`ClusterKey`]s to bounded clusters of scored
//! candidates. The key of a candidate is derived by the configured
//! [`SignatureKind`]; a population with a single, fixed key is a plain bounded
//! buffer.
//!
//! ## Capacity and eviction
//!
//! No cluster ever holds more than `capacity` members. When a full cluster
//! receives a candidate:
//!
//! - if the newcomer is strictly worse than every member, it is rejected;
//! - otherwise the worst member present before the insertion is evicted and
//!   the newcomer takes its place. Among equally bad members the one with the
//!   older `generation_index` goes first, then the one with the lower id.
//!
//! Unscored candidates are never stored.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use heurist::candidate::{Candidate, CandidateId, Direction};
//! use heurist::population::{Insertion, Population, SignatureKind};
//!
//! let mut population = Population::new(1, Direction::Minimize, SignatureKind::Textual).unwrap();
//! let scored = |id, score| {
//!     Candidate::new(CandidateId(id), "def f():\n    return 0\n", None, id as usize, vec![])
//!         .into_scored(score, Duration::ZERO)
//!         .unwrap()
//! };
//!
//! assert_eq!(population.insert(scored(1, 5.0)).unwrap(), Insertion::Inserted);
//! assert_eq!(
//!     population.insert(scored(2, 3.0)).unwrap(),
//!     Insertion::Replaced { evicted: CandidateId(1) }
//! );
//! assert_eq!(population.best().unwrap().score(), Some(3.0));
//! ```

pub mod signature;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::candidate::{Candidate, CandidateId, Direction};
use crate::error::{Result, SearchError};

pub use signature::{ClusterKey, SignatureKind};

/// Outcome of offering a candidate to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Stored without evicting anyone.
    Inserted,
    /// Stored after evicting `evicted`.
    Replaced { evicted: CandidateId },
    /// Not stored.
    Rejected,
}

impl Insertion {
    pub fn is_stored(&self) -> bool {
        !matches!(self, Insertion::Rejected)
    }
}

/// Orders candidates so that `Ordering::Less` means "evict first".
pub fn eviction_order(a: &Candidate, b: &Candidate, direction: Direction) -> Ordering {
    a.compare(b, direction)
        .then_with(|| a.generation_index().cmp(&b.generation_index()))
        .then_with(|| a.id().cmp(&b.id()))
}

/// Members sharing one cluster key.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    key: ClusterKey,
    members: Vec<Candidate>,
}

impl Cluster {
    fn new(key: ClusterKey) -> Self {
        Self {
            key,
            members: Vec::new(),
        }
    }

    pub fn key(&self) -> ClusterKey {
        self.key
    }

    pub fn members(&self) -> &[Candidate] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Best member; among equals the newest wins.
    pub fn best(&self, direction: Direction) -> Option<&Candidate> {
        self.members
            .iter()
            .max_by(|a, b| eviction_order(a, b, direction))
    }

    fn worst_index(&self, direction: Direction) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| eviction_order(a, b, direction))
            .map(|(index, _)| index)
    }
}

/// The evolving collection of scored candidates.
#[derive(Debug, Clone)]
pub struct Population {
    clusters: BTreeMap<ClusterKey, Cluster>,
    capacity: usize,
    direction: Direction,
    signature: SignatureKind,
}

impl Population {
    /// Creates an empty population.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Configuration` if `capacity` is zero.
    pub fn new(capacity: usize, direction: Direction, signature: SignatureKind) -> Result<Self> {
        if capacity == 0 {
            return Err(SearchError::Configuration(
                "Cluster capacity must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            clusters: BTreeMap::new(),
            capacity,
            direction,
            signature,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn signature(&self) -> SignatureKind {
        self.signature
    }

    /// Offers a scored candidate to the cluster matching its signature.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Evaluation` if the candidate has no score.
    pub fn insert(&mut self, candidate: Candidate) -> Result<Insertion> {
        let key = self.signature.key(&candidate);
        self.insert_into(key, candidate)
    }

    /// Offers a scored candidate to the cluster `key`, bypassing the signature.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Evaluation` if the candidate has no score.
    pub fn insert_into(&mut self, key: ClusterKey, candidate: Candidate) -> Result<Insertion> {
        if !candidate.is_scored() {
            return Err(SearchError::Evaluation(format!(
                "Candidate {} has no score and cannot be stored",
                candidate.id()
            )));
        }

        let direction = self.direction;
        let capacity = self.capacity;
        let cluster = self
            .clusters
            .entry(key)
            .or_insert_with(|| Cluster::new(key));

        if cluster.len() < capacity {
            cluster.members.push(candidate);
            return Ok(Insertion::Inserted);
        }

        let Some(worst) = cluster.worst_index(direction) else {
            cluster.members.push(candidate);
            return Ok(Insertion::Inserted);
        };
        if candidate.compare(&cluster.members[worst], direction) == Ordering::Less {
            return Ok(Insertion::Rejected);
        }

        let evicted = std::mem::replace(&mut cluster.members[worst], candidate);
        Ok(Insertion::Replaced {
            evicted: evicted.id(),
        })
    }

    /// Best candidate across all clusters.
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates()
            .max_by(|a, b| eviction_order(a, b, self.direction))
    }

    /// All stored candidates, cluster by cluster in key order.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.clusters.values().flat_map(|c| c.members.iter())
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn cluster(&self, key: ClusterKey) -> Option<&Cluster> {
        self.clusters.get(&key)
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn len(&self) -> usize {
        self.clusters.values().map(Cluster::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.values().all(Cluster::is_empty)
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: CandidateId) -> Option<&Candidate> {
        self.candidates().find(|c| c.id() == id)
    }

    /// Removes the cluster whose best member is worst, returning its members.
    pub fn remove_worst_cluster(&mut self) -> Option<Vec<Candidate>> {
        let direction = self.direction;
        let key = self
            .clusters
            .values()
            .filter_map(|cluster| cluster.best(direction).map(|best| (cluster.key, best)))
            .min_by(|(_, a), (_, b)| eviction_order(a, b, direction))
            .map(|(key, _)| key)?;
        self.clusters.remove(&key).map(|cluster| cluster.members)
    }

    /// Removes every candidate.
    pub fn clear(&mut self) {
        self.clusters.clear();
    }
}
