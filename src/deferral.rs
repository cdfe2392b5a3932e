//! The deferral loop: repeatedly re-query the least confident item.
//!
//! A [`Trial`] walks `Init → Selecting → Replacing → (Selecting | Done)`.
//! Every replacement spends at least one unit of one item's depth budget, so
//! a trial finishes within `item_count × policy.max_depth()` steps, and never
//! issues more than its re-query budget.
//!
//! **Isolation:** a trial owns its RNG and its item states; the task it runs
//! against is shared read-only.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::core::errors::{Result, RqsError};
use crate::policy::{ReplacementPolicy, Update};
use crate::scoring::{Score, select_lowest};
use crate::store::ItemKey;

/// A pool of items that can be drawn, scored, and re-queried.
///
/// Implementations hold the read-only evidence for one task; all mutable
/// trial state lives in [`Trial`].
pub trait DeferralTask: Sync {
    /// Per-item belief the policies update.
    type Belief: Clone + Send;
    /// One freshly drawn evidence sample.
    type Evidence;

    /// Short task label used in result keys and logs.
    fn label(&self) -> &'static str;

    /// Number of items in the pool.
    fn item_count(&self) -> usize;

    /// Stable key of an item, for logs.
    fn item_key(&self, item: usize) -> &ItemKey;

    /// One fresh evidence sample, chosen uniformly among the item's sources.
    /// Items without sources report [`RqsError::DataUnavailable`].
    fn draw_evidence(&self, item: usize, rng: &mut StdRng) -> Result<Self::Evidence>;

    /// First belief for an item. Some policies shape the initial draw.
    fn initial_belief(
        &self,
        item: usize,
        evidence: Self::Evidence,
        policy: ReplacementPolicy,
        rng: &mut StdRng,
    ) -> Result<Self::Belief>;

    /// Confidence of a belief; higher is more confident.
    fn score(&self, item: usize, belief: &Self::Belief, rng: &mut StdRng) -> Result<f64>;

    /// Error contribution of one item: 1 − accuracy or 1 − IoU.
    fn item_error(&self, item: usize, belief: &Self::Belief) -> f64;

    /// Share of the item judged correct at the IoU threshold: the label for
    /// discrete beliefs, the fraction of localized frames for tracks.
    fn item_accuracy(&self, item: usize, belief: &Self::Belief) -> f64;

    /// Apply a replacement policy with freshly drawn evidence.
    fn replace(
        &self,
        policy: ReplacementPolicy,
        item: usize,
        current: &Self::Belief,
        current_score: f64,
        evidence: Vec<Self::Evidence>,
        rng: &mut StdRng,
    ) -> Result<Update<Self::Belief>>;

    /// Lowest error any single source achieves for this item.
    fn oracle_error(&self, item: usize, rng: &mut StdRng) -> Result<f64>;
}

/// Parameters of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialPlan {
    /// Replacement rule; its `max_depth` is the per-item depth constraint.
    pub policy: ReplacementPolicy,
    /// Re-query budget as a fraction of the item count.
    pub max_rqr: f64,
}

/// Per-item mutable state inside a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemState<B> {
    /// Current belief.
    pub belief: B,
    /// Confidence, or exhausted once the depth limit is reached.
    pub score: Score,
    /// Re-queries spent on this item.
    pub depth: u32,
    /// Error of the current belief.
    pub error: f64,
}

/// Position in the loop's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    /// No item drawn yet.
    Init,
    /// Next step picks the least confident active item.
    Selecting,
    /// Next step re-queries this item.
    Replacing(usize),
    /// Budget spent or every item exhausted.
    Done,
}

/// Mean-error curve of one finished trial, indexed by cumulative re-queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// `budget + 1` values; index `k` is the mean error after `k` re-queries.
    pub errors: Vec<f64>,
    /// Policy applications performed.
    pub replacements: usize,
    /// Re-queries issued (may exceed the budget by one ensemble's cost).
    pub requeries: usize,
    /// Index of the first carried-forward value, if the loop ended early.
    pub carried_from: Option<usize>,
}

/// One run of the deferral loop for one policy and depth constraint.
pub struct Trial<'t, T: DeferralTask> {
    task: &'t T,
    plan: TrialPlan,
    budget: usize,
    rng: StdRng,
    state: TrialState,
    items: Vec<ItemState<T::Belief>>,
    requeries: usize,
    replacements: usize,
    errors: Vec<f64>,
}

impl<'t, T: DeferralTask> Trial<'t, T> {
    /// Trial in the `Init` state with its own seeded RNG.
    #[must_use]
    pub fn new(task: &'t T, plan: TrialPlan, seed: u64) -> Self {
        let budget = requery_budget(task.item_count(), plan.max_rqr);
        Self {
            task,
            plan,
            budget,
            rng: StdRng::seed_from_u64(seed),
            state: TrialState::Init,
            items: Vec::new(),
            requeries: 0,
            replacements: 0,
            errors: Vec::with_capacity(budget + 1),
        }
    }

    /// Current position in the state machine.
    #[must_use]
    pub const fn state(&self) -> TrialState {
        self.state
    }

    /// Per-item state; empty until initialized.
    #[must_use]
    pub fn items(&self) -> &[ItemState<T::Belief>] {
        &self.items
    }

    /// Mean errors snapshotted so far.
    #[must_use]
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Re-queries this trial may issue.
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Execute one state transition and return the new state.
    pub fn advance(&mut self) -> Result<TrialState> {
        self.state = match self.state {
            TrialState::Init => {
                self.initialize()?;
                TrialState::Selecting
            }
            TrialState::Selecting => self.select(),
            TrialState::Replacing(item) => {
                self.replace(item)?;
                TrialState::Selecting
            }
            TrialState::Done => TrialState::Done,
        };
        Ok(self.state)
    }

    /// Drive the trial to completion.
    pub fn run(mut self) -> Result<Trajectory> {
        while self.advance()? != TrialState::Done {}
        Ok(self.finish())
    }

    fn initialize(&mut self) -> Result<()> {
        let count = self.task.item_count();
        if count == 0 {
            return Err(RqsError::DataUnavailable {
                item: format!("{} task with no items", self.task.label()),
            });
        }
        self.items.reserve(count);
        for item in 0..count {
            let evidence = self.task.draw_evidence(item, &mut self.rng)?;
            let belief = self
                .task
                .initial_belief(item, evidence, self.plan.policy, &mut self.rng)?;
            let score = self.task.score(item, &belief, &mut self.rng)?;
            let error = self.task.item_error(item, &belief);
            self.items.push(ItemState {
                belief,
                score: Score::Active(score),
                depth: 0,
                error,
            });
        }
        self.snapshot(1);
        Ok(())
    }

    fn select(&self) -> TrialState {
        if self.requeries >= self.budget {
            return TrialState::Done;
        }
        let scores: Vec<Score> = self.items.iter().map(|s| s.score).collect();
        select_lowest(&scores).map_or(TrialState::Done, TrialState::Replacing)
    }

    fn replace(&mut self, item: usize) -> Result<()> {
        let policy = self.plan.policy;
        let Score::Active(current_score) = self.items[item].score else {
            return Err(RqsError::Runtime {
                details: format!("selected exhausted item {}", self.task.item_key(item)),
            });
        };

        let mut evidence = Vec::with_capacity(policy.evidence_draws());
        for _ in 0..policy.evidence_draws() {
            evidence.push(self.task.draw_evidence(item, &mut self.rng)?);
        }
        let Update { belief, score } = self.task.replace(
            policy,
            item,
            &self.items[item].belief,
            current_score,
            evidence,
            &mut self.rng,
        )?;

        let cost = policy.depth_cost();
        let depth = self.items[item].depth + cost;
        let exhausted = policy.exhausts_on_apply() || depth >= policy.max_depth();
        let score = if exhausted {
            Score::Exhausted
        } else {
            match score {
                Some(value) => Score::Active(value),
                None => Score::Active(self.task.score(item, &belief, &mut self.rng)?),
            }
        };
        let error = self.task.item_error(item, &belief);

        let state = &mut self.items[item];
        state.belief = belief;
        state.score = score;
        state.depth = depth;
        state.error = error;

        self.replacements += 1;
        self.requeries += cost as usize;
        self.snapshot(cost as usize);

        tracing::trace!(
            item = %self.task.item_key(item),
            depth,
            exhausted,
            requeries = self.requeries,
            "replaced"
        );
        Ok(())
    }

    /// Record the current mean error once per re-query consumed, never past
    /// the budget.
    fn snapshot(&mut self, repeats: usize) {
        let mean = self.items.iter().map(|s| s.error).sum::<f64>() / self.items.len() as f64;
        for _ in 0..repeats {
            if self.errors.len() > self.budget {
                break;
            }
            self.errors.push(mean);
        }
    }

    fn finish(mut self) -> Trajectory {
        let mut carried_from = None;
        if let Some(last) = self.errors.last().copied() {
            if self.errors.len() <= self.budget {
                carried_from = Some(self.errors.len());
            }
            self.errors.resize(self.budget + 1, last);
        }
        Trajectory {
            errors: self.errors,
            replacements: self.replacements,
            requeries: self.requeries,
            carried_from,
        }
    }
}

/// Re-queries allowed for `items` at re-query rate `max_rqr`.
#[must_use]
pub fn requery_budget(items: usize, max_rqr: f64) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let budget = (items as f64 * max_rqr).ceil().max(0.0) as usize;
    budget
}

/// Independent, reproducible seed for one trial.
///
/// SplitMix64 over the base seed, depth constraint, and trial index, so
/// neighbouring trials do not share correlated streams.
#[must_use]
pub fn trial_seed(base: u64, depth_constraint: u32, trial: usize) -> u64 {
    let mut x = base
        ^ u64::from(depth_constraint).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (trial as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
