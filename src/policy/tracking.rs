//! Replacement rules for particle-cloud tracking beliefs.
//!
//! Evidence for a video is the index of an annotator source whose fitted
//! per-frame mixtures stand in for a fresh human re-annotation.

use rand::Rng;

use super::{ReplacementPolicy, Update};
use crate::belief::{GaussianMixture, ParticleCloud, TrackBelief};
use crate::core::config::TrackingConfig;
use crate::core::errors::{Result, RqsError};
use crate::geometry::{BBox, IOU_CORRECT_THRESHOLD, calc_frame_iou};
use crate::scoring::sampled_iou_score;
use crate::store::TrackedVideo;

/// Apply `policy` to one video. `evidence` holds `policy.evidence_draws()`
/// source indices.
pub fn apply<R: Rng + ?Sized>(
    policy: ReplacementPolicy,
    video: &TrackedVideo,
    current: &TrackBelief,
    current_score: f64,
    evidence: Vec<usize>,
    params: &TrackingConfig,
    rng: &mut R,
) -> Result<Update<TrackBelief>> {
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
    let frames_of = |idx: usize| source_frames(video, idx);

    match policy {
        ReplacementPolicy::Naive { .. } => {
            let source = evidence[0];
            let cloud = ParticleCloud::draw(frames_of(source)?, params.num_particles, rng);
            Ok(Update {
                belief: TrackBelief {
                    cloud,
                    origin: source,
                },
                score: None,
            })
        }
        ReplacementPolicy::Smart { .. } => {
            let source = evidence[0];
            let cloud = ParticleCloud::draw(frames_of(source)?, params.num_particles, rng);
            let candidate_score = sampled_iou_score(&cloud, params.num_score_samples, rng)?;
            if candidate_score > current_score {
                Ok(Update {
                    belief: TrackBelief {
                        cloud,
                        origin: source,
                    },
                    score: Some(candidate_score),
                })
            } else {
                Ok(Update {
                    belief: current.clone(),
                    score: Some(current_score),
                })
            }
        }
        ReplacementPolicy::Combined { .. } => Ok(Update {
            belief: TrackBelief {
                cloud: current.cloud.fused(frames_of(evidence[0])?),
                origin: current.origin,
            },
            score: None,
        }),
        ReplacementPolicy::EnsembleMean { .. } => {
            let mut members = Vec::with_capacity(evidence.len() + 1);
            members.push(frames_of(current.origin)?);
            for idx in &evidence {
                members.push(frames_of(*idx)?);
            }
            let cloud = ParticleCloud::ensemble_mean(&members, params.num_particles, rng)?;
            Ok(Update {
                belief: TrackBelief {
                    cloud,
                    origin: current.origin,
                },
                score: None,
            })
        }
        ReplacementPolicy::EnsembleConsensus { .. } => {
            let current_best = current.cloud.best_boxes();
            let mut members = Vec::with_capacity(evidence.len());
            for idx in &evidence {
                members.push(frames_of(*idx)?);
            }
            let mut winners = Vec::with_capacity(current_best.len());
            for (f, best) in current_best.iter().enumerate() {
                let mut votes: Vec<BBox> = best.iter().copied().collect();
                votes.extend(
                    members
                        .iter()
                        .map(|m| BBox::from_array(m[f].mode_estimate())),
                );
                let Some(winner) = consensus_box(&votes, rng) else {
                    return Err(RqsError::degenerate(
                        "ensemble_consensus",
                        format!("no votes for frame {f} of {}", video.key),
                    ));
                };
                winners.push(winner);
            }
            Ok(Update {
                belief: TrackBelief {
                    cloud: ParticleCloud::point_mass(&winners),
                    origin: current.origin,
                },
                score: None,
            })
        }
    }
}

fn source_frames(video: &TrackedVideo, idx: usize) -> Result<&[GaussianMixture]> {
    video
        .sources
        .get(idx)
        .map(|s| s.frames.as_slice())
        .ok_or_else(|| RqsError::Runtime {
            details: format!("video {} has no source #{idx}", video.key),
        })
}

/// Majority box: each vote's support is the number of votes overlapping it at
/// IoU ≥ 0.5 (itself included); a maximum-support vote is chosen uniformly.
pub(crate) fn consensus_box<R: Rng + ?Sized>(votes: &[BBox], rng: &mut R) -> Option<BBox> {
    let support: Vec<usize> = votes
        .iter()
        .map(|a| {
            votes
                .iter()
                .filter(|b| calc_frame_iou(*a, **b) >= IOU_CORRECT_THRESHOLD)
                .count()
        })
        .collect();
    let top = support.iter().copied().max()?;
    let modes: Vec<usize> = support
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == top)
        .map(|(idx, _)| idx)
        .collect();
    Some(votes[modes[rng.random_range(0..modes.len())]])
}
