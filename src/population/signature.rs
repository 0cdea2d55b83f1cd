//! Cluster keys.
//!
//! Every signature is a pure function of the candidate, so the same program
//! always lands in the same cluster across runs and platforms.

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::task::parser;

/// Key of one cluster in a [`Population`](super::Population).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey(pub u64);

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// How candidates are grouped into clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignatureKind {
    /// Hash of the token-kind stream; identifiers, literals, comments and
    /// layout are ignored, so renamed or retuned variants share a cluster.
    #[default]
    Structural,
    /// Hash of the whitespace-normalised source.
    Textual,
    /// The score rounded to `decimals` places; candidates that perform the
    /// same share a cluster.
    Score { decimals: u32 },
}

impl SignatureKind {
    pub fn key(&self, candidate: &Candidate) -> ClusterKey {
        match self {
            SignatureKind::Structural => ClusterKey(parser::structural_signature(candidate.source())),
            SignatureKind::Textual => ClusterKey(parser::textual_signature(candidate.source())),
            SignatureKind::Score { decimals } => {
                let mut hasher = FxHasher::default();
                match candidate.score() {
                    Some(score) => {
                        let rounded = format!("{:.*}", *decimals as usize, score);
                        // -0.00 and 0.00 are the same cluster
                        let normalised = rounded.trim_start_matches('-');
                        if normalised.chars().all(|c| c == '0' || c == '.') {
                            normalised.hash(&mut hasher);
                        } else {
                            rounded.hash(&mut hasher);
                        }
                    }
                    None => "unscored".hash(&mut hasher),
                }
                ClusterKey(hasher.finish())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateId;
    use std::time::Duration;

    fn scored(source: &str, score: f64) -> Candidate {
        Candidate::new(CandidateId(1), source, None, 0, vec![])
            .into_scored(score, Duration::ZERO)
            .unwrap()
    }

    #[test]
    fn test_structural_ignores_names_and_constants() {
        let a = scored("def f(x):\n    return x * 2\n", 1.0);
        let b = scored("def f(y):\n    return y * 3  # tuned\n", 2.0);
        let c = scored("def f(x):\n    return x + 2\n", 1.0);

        let kind = SignatureKind::Structural;
        assert_eq!(kind.key(&a), kind.key(&b));
        assert_ne!(kind.key(&a), kind.key(&c));
    }

    #[test]
    fn test_score_signature_rounds() {
        let kind = SignatureKind::Score { decimals: 2 };
        let a = scored("def f():\n    return 1\n", 0.1234);
        let b = scored("def f():\n    return 2\n", 0.1249);
        let c = scored("def f():\n    return 3\n", 0.13);

        assert_eq!(kind.key(&a), kind.key(&b));
        assert_ne!(kind.key(&a), kind.key(&c));
        assert_eq!(
            kind.key(&scored("def f():\n    return 0\n", -0.001)),
            kind.key(&scored("def f():\n    return 0\n", 0.0))
        );
    }

    #[test]
    fn test_deserialize_kind() {
        let kind: SignatureKind = serde_json::from_str(r#"{"kind":"score","decimals":3}"#).unwrap();
        assert_eq!(kind, SignatureKind::Score { decimals: 3 });
    }
}
