//! Replacement policies: how a re-queried item's belief absorbs new evidence.
//!
//! A policy is chosen once per invocation from its CLI name
//! (`naive`, `smart_3`, `ensemble_consensus_5`, ...). The numeric suffix is
//! the maximum depth for single-query policies and the ensemble size for
//! ensemble policies. Without a suffix the depth constraint being swept
//! supplies it.

pub mod discrete;
pub mod tracking;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::{Result, RqsError};

static POLICY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(naive|smart|combined|ensemble_mean|ensemble_consensus)(?:_(\d+))?$")
        .unwrap_or_else(|err| unreachable!("policy pattern is a valid regex: {err}"))
});

/// Family of a replacement policy, without its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// Replace outright.
    Naive,
    /// Keep the more confident of old and new.
    Smart,
    /// Fuse old and new.
    Combined,
    /// Average an ensemble of draws.
    EnsembleMean,
    /// Majority vote over an ensemble.
    EnsembleConsensus,
}

impl PolicyKind {
    /// CLI name without a parameter.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Smart => "smart",
            Self::Combined => "combined",
            Self::EnsembleMean => "ensemble_mean",
            Self::EnsembleConsensus => "ensemble_consensus",
        }
    }

    /// Whether one application draws a whole ensemble.
    #[must_use]
    pub const fn is_ensemble(self) -> bool {
        matches!(self, Self::EnsembleMean | Self::EnsembleConsensus)
    }
}

/// A policy as named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicySpec {
    /// Policy family.
    pub kind: PolicyKind,
    /// Explicit `_n` suffix, if given.
    pub param: Option<u32>,
}

impl FromStr for PolicySpec {
    type Err = RqsError;

    fn from_str(value: &str) -> Result<Self> {
        let invalid = |details: &str| RqsError::InvalidPolicy {
            name: value.to_string(),
            details: details.to_string(),
        };
        let caps = POLICY_NAME.captures(value).ok_or_else(|| {
            invalid("expected naive|smart|combined|ensemble_mean|ensemble_consensus with optional _<n>")
        })?;
        let kind = match &caps[1] {
            "naive" => PolicyKind::Naive,
            "smart" => PolicyKind::Smart,
            "combined" => PolicyKind::Combined,
            "ensemble_mean" => PolicyKind::EnsembleMean,
            _ => PolicyKind::EnsembleConsensus,
        };
        let param = match caps.get(2) {
            Some(m) => {
                let n: u32 = m
                    .as_str()
                    .parse()
                    .map_err(|_| invalid("numeric parameter out of range"))?;
                if n == 0 {
                    return Err(invalid("numeric parameter must be at least 1"));
                }
                Some(n)
            }
            None => None,
        };
        Ok(Self { kind, param })
    }
}

impl fmt::Display for PolicySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.param {
            Some(n) => write!(f, "{}_{n}", self.kind.name()),
            None => f.write_str(self.kind.name()),
        }
    }
}

impl PolicySpec {
    /// Depth constraints this policy is evaluated at. An explicit parameter
    /// pins a single constraint; otherwise the configured sweep applies.
    #[must_use]
    pub fn depth_sweep(&self, configured: &[u32]) -> Vec<u32> {
        self.param.map_or_else(|| configured.to_vec(), |n| vec![n])
    }

    /// Concrete policy for one depth constraint.
    #[must_use]
    pub fn resolve(&self, depth_constraint: u32) -> ReplacementPolicy {
        let n = self.param.unwrap_or(depth_constraint);
        match self.kind {
            PolicyKind::Naive => ReplacementPolicy::Naive { max_depth: n },
            PolicyKind::Smart => ReplacementPolicy::Smart { max_depth: n },
            PolicyKind::Combined => ReplacementPolicy::Combined { max_depth: n },
            PolicyKind::EnsembleMean => ReplacementPolicy::EnsembleMean { size: n },
            PolicyKind::EnsembleConsensus => ReplacementPolicy::EnsembleConsensus { size: n },
        }
    }
}

/// A fully parameterized replacement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplacementPolicy {
    /// Replace the belief with the new evidence.
    Naive {
        /// Re-queries an item may receive.
        max_depth: u32,
    },
    /// Keep whichever of old and new scores higher.
    Smart {
        /// Re-queries an item may receive.
        max_depth: u32,
    },
    /// Multiply old and new mass, then renormalize.
    Combined {
        /// Re-queries an item may receive.
        max_depth: u32,
    },
    /// Average the current belief with `size` fresh draws.
    EnsembleMean {
        /// Draws per application; also the depth it costs.
        size: u32,
    },
    /// Majority vote over the current answer and `size` fresh draws.
    EnsembleConsensus {
        /// Draws per application; also the depth it costs.
        size: u32,
    },
}

impl ReplacementPolicy {
    /// Family of this policy.
    #[must_use]
    pub const fn kind(self) -> PolicyKind {
        match self {
            Self::Naive { .. } => PolicyKind::Naive,
            Self::Smart { .. } => PolicyKind::Smart,
            Self::Combined { .. } => PolicyKind::Combined,
            Self::EnsembleMean { .. } => PolicyKind::EnsembleMean,
            Self::EnsembleConsensus { .. } => PolicyKind::EnsembleConsensus,
        }
    }

    /// Depth units consumed by one application.
    #[must_use]
    pub const fn depth_cost(self) -> u32 {
        match self {
            Self::Naive { .. } | Self::Smart { .. } | Self::Combined { .. } => 1,
            Self::EnsembleMean { size } | Self::EnsembleConsensus { size } => size,
        }
    }

    /// Depth at which an item stops being selectable. Ensembles reach it, or
    /// pass it, in their single application.
    #[must_use]
    pub const fn max_depth(self) -> u32 {
        match self {
            Self::Naive { max_depth } | Self::Smart { max_depth } | Self::Combined { max_depth } => {
                max_depth
            }
            Self::EnsembleMean { size } | Self::EnsembleConsensus { size } => size,
        }
    }

    /// Evidence samples consumed by one application.
    #[must_use]
    pub const fn evidence_draws(self) -> usize {
        self.depth_cost() as usize
    }

    /// Whether the item is finished after a single application regardless of
    /// its remaining depth.
    #[must_use]
    pub const fn exhausts_on_apply(self) -> bool {
        self.kind().is_ensemble()
    }
}

/// Result of applying a policy to one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Update<B> {
    /// Belief after the update.
    pub belief: B,
    /// Confidence of `belief` when the policy already computed it.
    pub score: Option<f64>,
}
