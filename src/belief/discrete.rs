//! Discrete beliefs over a target's candidate detections.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use super::normalize::{argmax, normalize_probabilities};
use crate::core::errors::Result;
use crate::geometry::{BBox, IOU_CORRECT_THRESHOLD, calc_frame_iou};
use crate::scoring::{ScoringMethod, probability_confidence};

/// Outcome label attached to a referring-expression answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    Undefined,
    /// The correct object was never among the candidate detections.
    MissedDetection,
    Ambiguous,
    Misunderstood,
    Correct,
}

/// One model output for a target: a distribution over its detections plus
/// the label assigned to that output's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteEvidence {
    pub probabilities: Vec<f64>,
    pub failure_mode: FailureMode,
}

/// Current belief for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteBelief {
    pub probabilities: Vec<f64>,
    pub label: FailureMode,
}

impl DiscreteBelief {
    /// Adopt an evidence row as-is. Rows that do not sum to one are
    /// renormalized; zero or non-finite mass fails the draw.
    pub fn from_evidence(evidence: &DiscreteEvidence) -> Result<Self> {
        Ok(Self {
            probabilities: normalized(&evidence.probabilities)?,
            label: evidence.failure_mode,
        })
    }

    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.label == FailureMode::Correct
    }

    /// Confidence under a discrete scoring method.
    #[must_use]
    pub fn confidence(&self, method: ScoringMethod) -> f64 {
        probability_confidence(method, &self.probabilities)
    }

    /// Most probable candidate.
    #[must_use]
    pub fn argmax(&self) -> Option<usize> {
        argmax(&self.probabilities)
    }

    /// Relabel after the answer moved to `winner`.
    ///
    /// A winning detection overlapping the ground truth is correct. Otherwise a
    /// missed detection stays missed; anything else becomes undefined.
    #[must_use]
    pub fn relabel(
        previous: FailureMode,
        winner: Option<usize>,
        detections: &[BBox],
        ground_truth: BBox,
    ) -> FailureMode {
        let iou = winner
            .and_then(|idx| detections.get(idx))
            .map_or(0.0, |det| calc_frame_iou(ground_truth, *det));
        if iou >= IOU_CORRECT_THRESHOLD {
            FailureMode::Correct
        } else if previous == FailureMode::MissedDetection {
            FailureMode::MissedDetection
        } else {
            FailureMode::Undefined
        }
    }
}

/// Normalize only when the vector is not already a distribution.
pub(crate) fn normalized(probabilities: &[f64]) -> Result<Vec<f64>> {
    let total: f64 = probabilities.iter().sum();
    if (total - 1.0).abs() <= 1e-9 && probabilities.iter().all(|p| *p >= 0.0) {
        return Ok(probabilities.to_vec());
    }
    normalize_probabilities(probabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detections() -> Vec<BBox> {
        vec![
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(100.0, 100.0, 10.0, 10.0),
        ]
    }

    #[test]
    fn unnormalized_evidence_is_rescaled() {
        let belief = DiscreteBelief::from_evidence(&DiscreteEvidence {
            probabilities: vec![2.0, 6.0],
            failure_mode: FailureMode::Correct,
        })
        .expect("belief");
        assert_eq!(belief.probabilities, vec![0.25, 0.75]);
        assert!(belief.is_correct());
    }

    #[test]
    fn zero_evidence_fails_the_draw() {
        let err = DiscreteBelief::from_evidence(&DiscreteEvidence {
            probabilities: vec![0.0, 0.0],
            failure_mode: FailureMode::Undefined,
        })
        .unwrap_err();
        assert_eq!(err.code(), "RQS-2003");
    }

    #[test]
    fn relabel_marks_overlapping_winner_correct() {
        let gt = BBox::new(1.0, 1.0, 10.0, 10.0);
        assert_eq!(
            DiscreteBelief::relabel(FailureMode::Undefined, Some(0), &detections(), gt),
            FailureMode::Correct
        );
    }

    #[test]
    fn relabel_keeps_missed_detection() {
        let gt = BBox::new(500.0, 500.0, 10.0, 10.0);
        assert_eq!(
            DiscreteBelief::relabel(FailureMode::MissedDetection, Some(0), &detections(), gt),
            FailureMode::MissedDetection
        );
        assert_eq!(
            DiscreteBelief::relabel(FailureMode::Correct, Some(1), &detections(), gt),
            FailureMode::Undefined
        );
    }

    #[test]
    fn failure_mode_uses_snake_case() {
        let json = serde_json::to_string(&FailureMode::MissedDetection).expect("json");
        assert_eq!(json, "\"missed_detection\"");
    }
}
