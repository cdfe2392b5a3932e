use rand::rngs::StdRng;

use super::pick_source;
use crate::belief::{DiscreteBelief, DiscreteEvidence, FailureMode};
use crate::core::errors::{Result, RqsError};
use crate::deferral::DeferralTask;
use crate::policy::{ReplacementPolicy, Update, discrete};
use crate::scoring::ScoringMethod;
use crate::store::{ItemKey, RefTarget};

/// Referring-expression targets of one split, scored by a discrete method.
#[derive(Debug, Clone, Copy)]
pub struct ReferringTask<'a> {
    targets: &'a [RefTarget],
    scoring: ScoringMethod,
}

impl<'a> ReferringTask<'a> {
    /// Task over one split. Only discrete scoring methods apply.
    pub fn new(targets: &'a [RefTarget], scoring: ScoringMethod) -> Result<Self> {
        if !scoring.is_discrete() {
            return Err(RqsError::InvalidScoring {
                name: format!("{scoring} (not applicable to referring expressions)"),
            });
        }
        Ok(Self { targets, scoring })
    }
}

impl DeferralTask for ReferringTask<'_> {
    type Belief = DiscreteBelief;
    type Evidence = DiscreteEvidence;

    fn label(&self) -> &'static str {
        "refexp"
    }

    fn item_count(&self) -> usize {
        self.targets.len()
    }

    fn item_key(&self, item: usize) -> &ItemKey {
        &self.targets[item].key
    }

    fn draw_evidence(&self, item: usize, rng: &mut StdRng) -> Result<DiscreteEvidence> {
        let target = &self.targets[item];
        let idx = pick_source(&target.key, target.evidence.len(), rng)?;
        Ok(target.evidence[idx].clone())
    }

    fn initial_belief(
        &self,
        _item: usize,
        evidence: DiscreteEvidence,
        _policy: ReplacementPolicy,
        _rng: &mut StdRng,
    ) -> Result<DiscreteBelief> {
        DiscreteBelief::from_evidence(&evidence)
    }

    fn score(&self, _item: usize, belief: &DiscreteBelief, _rng: &mut StdRng) -> Result<f64> {
        Ok(belief.confidence(self.scoring))
    }

    fn item_error(&self, _item: usize, belief: &DiscreteBelief) -> f64 {
        if belief.is_correct() { 0.0 } else { 1.0 }
    }

    fn item_accuracy(&self, item: usize, belief: &DiscreteBelief) -> f64 {
        1.0 - self.item_error(item, belief)
    }

    fn replace(
        &self,
        policy: ReplacementPolicy,
        item: usize,
        current: &DiscreteBelief,
        current_score: f64,
        evidence: Vec<DiscreteEvidence>,
        rng: &mut StdRng,
    ) -> Result<Update<DiscreteBelief>> {
        discrete::apply(
            policy,
            &self.targets[item],
            current,
            current_score,
            evidence,
            self.scoring,
            rng,
        )
    }

    fn oracle_error(&self, item: usize, _rng: &mut StdRng) -> Result<f64> {
        let target = &self.targets[item];
        if target.evidence.is_empty() {
            return Err(RqsError::DataUnavailable {
                item: target.key.to_string(),
            });
        }
        let any_correct = target
            .evidence
            .iter()
            .any(|row| row.failure_mode == FailureMode::Correct);
        Ok(if any_correct { 0.0 } else { 1.0 })
    }
}
