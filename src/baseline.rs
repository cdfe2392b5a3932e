//! Reference points for the deferral curves: no re-queries at all, and an
//! oracle that always keeps each item's best source.

use rand::rngs::StdRng;

use crate::core::errors::{Result, RqsError};
use crate::deferral::DeferralTask;
use crate::policy::ReplacementPolicy;

/// Mean error over repeated deferral-free trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineSummary {
    /// Mean error across trials.
    pub mean: f64,
    /// Standard error of the mean across trials.
    pub stderr: f64,
    /// Mean share of items judged correct at the IoU threshold.
    pub accuracy: f64,
    /// Trials averaged.
    pub trials: usize,
}

/// Error when every item keeps one uniformly drawn source and nothing is
/// re-queried.
pub fn deferral_free<T: DeferralTask>(
    task: &T,
    trials: usize,
    rng: &mut StdRng,
) -> Result<BaselineSummary> {
    if trials == 0 || task.item_count() == 0 {
        return Err(RqsError::InvalidConfig {
            details: format!(
                "baseline needs trials and items (got {trials} trials, {} items)",
                task.item_count()
            ),
        });
    }
    let policy = ReplacementPolicy::Naive { max_depth: 1 };
    let mut per_trial = Vec::with_capacity(trials);
    let mut correct = 0.0;
    for _ in 0..trials {
        let mut total = 0.0;
        for item in 0..task.item_count() {
            let evidence = task.draw_evidence(item, rng)?;
            let belief = task.initial_belief(item, evidence, policy, rng)?;
            total += task.item_error(item, &belief);
            correct += task.item_accuracy(item, &belief);
        }
        per_trial.push(total / task.item_count() as f64);
    }

    let n = per_trial.len() as f64;
    let mean = per_trial.iter().sum::<f64>() / n;
    let stderr = if per_trial.len() > 1 {
        let variance = per_trial.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / (n - 1.0);
        (variance / n).sqrt()
    } else {
        0.0
    };
    Ok(BaselineSummary {
        mean,
        stderr,
        accuracy: correct / (n * task.item_count() as f64),
        trials,
    })
}

/// Mean error if every item used the source that serves it best.
pub fn oracle_best<T: DeferralTask>(task: &T, rng: &mut StdRng) -> Result<f64> {
    if task.item_count() == 0 {
        return Err(RqsError::DataUnavailable {
            item: format!("{} task with no items", task.label()),
        });
    }
    let mut total = 0.0;
    for item in 0..task.item_count() {
        total += task.oracle_error(item, rng)?;
    }
    Ok(total / task.item_count() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::{DiscreteEvidence, FailureMode};
    use crate::geometry::BBox;
    use crate::scoring::ScoringMethod;
    use crate::store::{ItemKey, RefTarget};
    use crate::task::ReferringTask;
    use rand::SeedableRng;

    fn target(key: &str, modes: &[FailureMode]) -> RefTarget {
        RefTarget {
            key: ItemKey(key.to_string()),
            ground_truth: BBox::new(0.0, 0.0, 10.0, 10.0),
            detections: vec![BBox::new(0.0, 0.0, 10.0, 10.0)],
            evidence: modes
                .iter()
                .map(|mode| DiscreteEvidence {
                    probabilities: vec![1.0],
                    failure_mode: *mode,
                })
                .collect(),
        }
    }

    #[test]
    fn single_source_items_have_no_spread() {
        let targets = vec![
            target("a", &[FailureMode::Correct]),
            target("b", &[FailureMode::Misunderstood]),
        ];
        let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
        let mut rng = StdRng::seed_from_u64(1);
        let summary = deferral_free(&task, 10, &mut rng).expect("baseline");
        assert!((summary.mean - 0.5).abs() < 1e-12);
        assert!((summary.accuracy - 0.5).abs() < 1e-12);
        assert!(summary.stderr.abs() < 1e-12);
        assert!((oracle_best(&task, &mut rng).expect("oracle") - 0.5).abs() < 1e-12);
    }

    #[test]
    fn oracle_never_exceeds_deferral_free() {
        let targets = vec![
            target("a", &[FailureMode::Correct, FailureMode::Ambiguous]),
            target("b", &[FailureMode::Misunderstood, FailureMode::Correct]),
            target("c", &[FailureMode::MissedDetection]),
        ];
        let task = ReferringTask::new(&targets, ScoringMethod::Entropy).expect("task");
        let mut rng = StdRng::seed_from_u64(2);
        let summary = deferral_free(&task, 200, &mut rng).expect("baseline");
        let oracle = oracle_best(&task, &mut rng).expect("oracle");
        assert!((oracle - 1.0 / 3.0).abs() < 1e-12);
        assert!(summary.mean >= oracle);
        assert!(summary.stderr > 0.0);
    }

    #[test]
    fn zero_trials_is_rejected() {
        let targets = vec![target("a", &[FailureMode::Correct])];
        let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(deferral_free(&task, 0, &mut rng).unwrap_err().code(), "RQS-1001");
    }
}
