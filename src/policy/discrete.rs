//! Replacement rules for discrete referring-expression beliefs.

use std::collections::BTreeMap;

use rand::Rng;

use super::{ReplacementPolicy, Update};
use crate::belief::discrete::normalized;
use crate::belief::normalize::argmax;
use crate::belief::{DiscreteBelief, DiscreteEvidence};
use crate::core::errors::{Result, RqsError};
use crate::scoring::ScoringMethod;
use crate::store::RefTarget;

/// Apply `policy` to one target.
///
/// `evidence` holds exactly `policy.evidence_draws()` fresh outputs for the
/// target and is consumed.
pub fn apply<R: Rng + ?Sized>(
    policy: ReplacementPolicy,
    target: &RefTarget,
    current: &DiscreteBelief,
    current_score: f64,
    evidence: Vec<DiscreteEvidence>,
    scoring: ScoringMethod,
    rng: &mut R,
) -> Result<Update<DiscreteBelief>> {
    if evidence.len() != policy.evidence_draws() {
        return Err(RqsError::Runtime {
            details: format!(
                "{:?} expects {} evidence draws, got {}",
                policy,
                policy.evidence_draws(),
                evidence.len()
            ),
        });
    }

    match policy {
        ReplacementPolicy::Naive { .. } => {
            let belief = DiscreteBelief::from_evidence(&evidence[0])?;
            let score = scoring.discrete_confidence(&belief);
            Ok(Update {
                belief,
                score: Some(score),
            })
        }
        ReplacementPolicy::Smart { .. } => {
            let candidate = DiscreteBelief::from_evidence(&evidence[0])?;
            let candidate_score = scoring.discrete_confidence(&candidate);
            if candidate_score > current_score {
                Ok(Update {
                    belief: candidate,
                    score: Some(candidate_score),
                })
            } else {
                Ok(Update {
                    belief: current.clone(),
                    score: Some(current_score),
                })
            }
        }
        ReplacementPolicy::Combined { .. } => {
            let incoming = normalized(&evidence[0].probabilities)?;
            let product: Vec<f64> = current
                .probabilities
                .iter()
                .zip(&incoming)
                .map(|(p, q)| p * q)
                .collect();
            let probabilities = normalized(&product)?;
            let belief = relabeled(current, probabilities, target);
            let score = scoring.discrete_confidence(&belief);
            Ok(Update {
                belief,
                score: Some(score),
            })
        }
        ReplacementPolicy::EnsembleMean { .. } => {
            let mut sum = current.probabilities.clone();
            for row in &evidence {
                for (acc, q) in sum.iter_mut().zip(normalized(&row.probabilities)?) {
                    *acc += q;
                }
            }
            let members = (evidence.len() + 1) as f64;
            let probabilities: Vec<f64> = sum.into_iter().map(|p| p / members).collect();
            Ok(Update {
                belief: relabeled(current, probabilities, target),
                score: None,
            })
        }
        ReplacementPolicy::EnsembleConsensus { .. } => {
            let mut votes = Vec::with_capacity(evidence.len() + 1);
            votes.push(current.argmax());
            for row in &evidence {
                votes.push(argmax(&row.probabilities));
            }
            let winner = consensus(&votes, rng);
            let label = DiscreteBelief::relabel(
                current.label,
                winner,
                &target.detections,
                target.ground_truth,
            );
            // The consensus answer carries all its mass.
            let mut probabilities = vec![0.0; current.probabilities.len()];
            if let Some(slot) = winner.and_then(|w| probabilities.get_mut(w)) {
                *slot = 1.0;
            }
            Ok(Update {
                belief: DiscreteBelief {
                    probabilities,
                    label,
                },
                score: None,
            })
        }
    }
}

fn relabeled(current: &DiscreteBelief, probabilities: Vec<f64>, target: &RefTarget) -> DiscreteBelief {
    let winner = argmax(&probabilities);
    let label = DiscreteBelief::relabel(
        current.label,
        winner,
        &target.detections,
        target.ground_truth,
    );
    DiscreteBelief {
        probabilities,
        label,
    }
}

/// Most frequent vote; ties resolved uniformly at random among the modes.
pub(crate) fn consensus<R: Rng + ?Sized>(votes: &[Option<usize>], rng: &mut R) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for vote in votes.iter().flatten() {
        *counts.entry(*vote).or_default() += 1;
    }
    let top = counts.values().copied().max()?;
    let modes: Vec<usize> = counts
        .into_iter()
        .filter(|(_, count)| *count == top)
        .map(|(candidate, _)| candidate)
        .collect();
    Some(modes[rng.random_range(0..modes.len())])
}
