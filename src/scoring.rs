//! Confidence scores and lowest-confidence selection.
//!
//! Higher scores mean more confident beliefs. Selection picks the minimum
//! among items that still have re-query budget.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;

use crate::belief::normalize::normalize_log_weights;
use crate::belief::{DiscreteBelief, ParticleCloud};
use crate::core::errors::{Result, RqsError};
use crate::geometry::{BBox, calc_frame_iou};

/// How a belief is reduced to a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoringMethod {
    /// Probability of the most likely candidate.
    MaxProb,
    /// Negative Shannon entropy of the candidate distribution.
    Entropy,
    /// Gap between the two most likely candidates.
    Margin,
    /// Mean IoU between weighted-sampled particle pairs, averaged over frames.
    SampledIou,
}

impl ScoringMethod {
    /// Name as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MaxProb => "max_prob",
            Self::Entropy => "entropy",
            Self::Margin => "margin",
            Self::SampledIou => "mean",
        }
    }

    /// Whether the method scores discrete candidate distributions.
    #[must_use]
    pub const fn is_discrete(self) -> bool {
        !matches!(self, Self::SampledIou)
    }

    /// Confidence of a discrete belief.
    #[must_use]
    pub fn discrete_confidence(self, belief: &DiscreteBelief) -> f64 {
        belief.confidence(self)
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScoringMethod {
    type Err = RqsError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "max_prob" | "least_confidence" => Ok(Self::MaxProb),
            "entropy" => Ok(Self::Entropy),
            "margin" => Ok(Self::Margin),
            "mean" | "sampled_iou" => Ok(Self::SampledIou),
            other => Err(RqsError::InvalidScoring {
                name: other.to_string(),
            }),
        }
    }
}

/// Confidence of a probability vector under a discrete method.
#[must_use]
pub fn probability_confidence(method: ScoringMethod, probabilities: &[f64]) -> f64 {
    match method {
        ScoringMethod::MaxProb | ScoringMethod::SampledIou => probabilities
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max),
        ScoringMethod::Entropy => probabilities
            .iter()
            .filter(|p| **p > 0.0)
            .map(|p| p * p.ln())
            .sum(),
        ScoringMethod::Margin => {
            let mut top = [f64::NEG_INFINITY; 2];
            for p in probabilities.iter().copied() {
                if p > top[0] {
                    top = [p, top[0]];
                } else if p > top[1] {
                    top[1] = p;
                }
            }
            if top[1] == f64::NEG_INFINITY {
                top[0]
            } else {
                top[0] - top[1]
            }
        }
    }
}

/// Self-consistency of a particle cloud.
///
/// Per frame: normalize weights, draw `num_samples` particles by weight, then
/// average the IoU of `num_samples` uniformly drawn pairs from that selection.
/// The score is the mean across frames.
pub fn sampled_iou_score<R: Rng + ?Sized>(
    cloud: &ParticleCloud,
    num_samples: usize,
    rng: &mut R,
) -> Result<f64> {
    if cloud.frames.is_empty() || num_samples == 0 {
        return Err(RqsError::degenerate(
            "sampled_iou_score",
            "cloud has no frames or no samples requested",
        ));
    }
    let mut frame_scores = Vec::with_capacity(cloud.frames.len());
    for frame in &cloud.frames {
        let probabilities = normalize_log_weights(&frame.log_weights)?;
        let picker = WeightedIndex::new(&probabilities)
            .map_err(|err| RqsError::degenerate("sampled_iou_score", err.to_string()))?;
        let selection: Vec<usize> = (0..num_samples).map(|_| picker.sample(rng)).collect();

        let mut total = 0.0;
        for _ in 0..num_samples {
            let a = selection[rng.random_range(0..num_samples)];
            let b = selection[rng.random_range(0..num_samples)];
            total += calc_frame_iou(
                BBox::from_array(frame.locs[a]),
                BBox::from_array(frame.locs[b]),
            );
        }
        frame_scores.push(total / num_samples as f64);
    }
    Ok(frame_scores.iter().sum::<f64>() / frame_scores.len() as f64)
}

/// Selection state of an item's score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    /// Eligible for re-query with this confidence.
    Active(f64),
    /// Depth budget spent; never selected again.
    Exhausted,
}

impl Score {
    /// Whether the item is out of depth.
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

/// Lowest-confidence active item. Ties go to the lowest index; NaN scores
/// sort after every real score.
#[must_use]
pub fn select_lowest(scores: &[Score]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, score) in scores.iter().enumerate() {
        let Score::Active(value) = *score else {
            continue;
        };
        match best {
            None => best = Some((idx, value)),
            Some((_, current)) => {
                let better = match (value.is_nan(), current.is_nan()) {
                    (true, _) => false,
                    (false, true) => true,
                    (false, false) => value < current,
                };
                if better {
                    best = Some((idx, value));
                }
            }
        }
    }
    best.map(|(idx, _)| idx)
}
