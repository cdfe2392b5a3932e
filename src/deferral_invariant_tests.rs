//! Deferral-loop unit-test matrix: invariant checks across policies, depth
//! constraints, and both task instantiations.
//!
//! Covers five invariant families:
//! 1. Deterministic selection and lowest-index tie-break
//! 2. Depth monotonicity, exhaustion, and ensemble overshoot
//! 3. Trajectory shape, budget truncation, and carry-forward
//! 4. Belief renormalization after every replacement
//! 5. Disjoint-range merges reproduce the full run
//!
//! Uses seeded RNG for reproducible randomized fixtures.

use crate::belief::{DiscreteEvidence, FailureMode, GaussianMixture};
use crate::core::config::{SimulationConfig, TrackingConfig};
use crate::deferral::{DeferralTask, Trial, TrialPlan, TrialState};
use crate::geometry::BBox;
use crate::policy::{PolicySpec, ReplacementPolicy};
use crate::runner::run_range;
use crate::scoring::{Score, ScoringMethod};
use crate::store::{ItemKey, RefTarget, SourceKey, TrackSource, TrackedVideo};
use crate::task::{ReferringTask, TrackingTask};

// ──────────────────── seeded RNG ────────────────────

/// Simple seeded LCG for reproducible test fixtures.
struct SeededRng {
    state: u64,
}

impl SeededRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // LCG parameters from Numerical Recipes.
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        self.state
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next_u64() % (hi - lo + 1)
    }
}

// ──────────────────── fixture builders ────────────────────

const GT: BBox = BBox::new(0.0, 0.0, 10.0, 10.0);

fn detections(count: usize) -> Vec<BBox> {
    (0..count)
        .map(|k| BBox::new(60.0 * k as f64, 60.0 * k as f64, 10.0, 10.0))
        .collect()
}

/// One output with strictly positive mass; correct when detection 0 wins.
fn random_evidence(rng: &mut SeededRng, candidates: usize) -> DiscreteEvidence {
    let probabilities: Vec<f64> = (0..candidates).map(|_| 0.05 + rng.next_f64()).collect();
    let winner = probabilities
        .iter()
        .enumerate()
        .fold(0, |best, (i, p)| if *p > probabilities[best] { i } else { best });
    DiscreteEvidence {
        probabilities,
        failure_mode: if winner == 0 {
            FailureMode::Correct
        } else {
            FailureMode::Misunderstood
        },
    }
}

fn random_targets(rng: &mut SeededRng, count: usize) -> Vec<RefTarget> {
    (0..count)
        .map(|i| {
            let candidates = rng.next_range(2, 5) as usize;
            let outputs = rng.next_range(1, 4) as usize;
            RefTarget {
                key: ItemKey(format!("target-{i:03}")),
                ground_truth: GT,
                detections: detections(candidates),
                evidence: (0..outputs)
                    .map(|_| random_evidence(rng, candidates))
                    .collect(),
            }
        })
        .collect()
}

fn identical_targets(count: usize) -> Vec<RefTarget> {
    (0..count)
        .map(|i| RefTarget {
            key: ItemKey(format!("same-{i}")),
            ground_truth: GT,
            detections: detections(2),
            evidence: vec![DiscreteEvidence {
                probabilities: vec![0.6, 0.4],
                failure_mode: FailureMode::Correct,
            }],
        })
        .collect()
}

fn tiny_videos(count: usize) -> Vec<TrackedVideo> {
    let source = |name: &str, x: f64| TrackSource {
        key: SourceKey(name.to_string()),
        frames: (0..2)
            .map(|_| GaussianMixture::isotropic([x, 0.0, 10.0, 10.0], 1.0).expect("mixture"))
            .collect(),
    };
    (0..count)
        .map(|i| TrackedVideo {
            key: ItemKey(format!("video-{i}")),
            ground_truth: vec![GT; 2],
            sources: vec![source("a", 0.0), source("b", 3.0)],
        })
        .collect()
}

fn tiny_tracking() -> TrackingConfig {
    TrackingConfig {
        num_particles: 16,
        num_score_samples: 8,
        smear_stdevs: [1.0; 4],
    }
}

fn plan(policy: ReplacementPolicy, max_rqr: f64) -> TrialPlan {
    TrialPlan { policy, max_rqr }
}

const POLICY_NAMES: [&str; 5] = [
    "naive",
    "smart",
    "combined",
    "ensemble_mean",
    "ensemble_consensus",
];

/// Every (policy, depth) combination at a generous budget.
fn policy_grid() -> Vec<(ReplacementPolicy, u32)> {
    let mut grid = Vec::new();
    for name in POLICY_NAMES {
        let spec: PolicySpec = name.parse().expect("policy");
        for depth in 1..=3 {
            grid.push((spec.resolve(depth), depth));
        }
    }
    grid
}

/// Step a trial to completion, calling `check` after every transition.
fn drive<T: DeferralTask>(trial: &mut Trial<'_, T>, mut check: impl FnMut(&Trial<'_, T>, TrialState)) {
    loop {
        let state = trial.advance().expect("advance");
        check(trial, state);
        if state == TrialState::Done {
            break;
        }
    }
}

// ════════════════════════════════════════════════════════════
// INVARIANT FAMILY 1: Deterministic selection and tie-break
// ════════════════════════════════════════════════════════════

#[test]
fn same_seed_reproduces_the_trajectory() {
    let mut rng = SeededRng::new(42);
    let targets = random_targets(&mut rng, 12);
    let task = ReferringTask::new(&targets, ScoringMethod::Entropy).expect("task");
    for (policy, depth) in policy_grid() {
        let a = Trial::new(&task, plan(policy, 1.0), 7).run().expect("a");
        let b = Trial::new(&task, plan(policy, 1.0), 7).run().expect("b");
        assert_eq!(a, b, "{policy:?} at depth {depth} is not reproducible");
    }
}

#[test]
fn ties_resolve_to_lowest_index() {
    let targets = identical_targets(3);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
    let mut trial = Trial::new(&task, plan(ReplacementPolicy::Naive { max_depth: 1 }, 1.0), 0);
    let mut chosen = Vec::new();
    drive(&mut trial, |_, state| {
        if let TrialState::Replacing(item) = state {
            chosen.push(item);
        }
    });
    assert_eq!(chosen, vec![0, 1, 2]);
}

#[test]
fn selection_always_takes_the_minimum_active_score() {
    let mut rng = SeededRng::new(1234);
    for round in 0..6 {
        let targets = random_targets(&mut rng, 10);
        let task = ReferringTask::new(&targets, ScoringMethod::Margin).expect("task");
        for (policy, depth) in policy_grid() {
            let mut trial = Trial::new(&task, plan(policy, 2.0), round);
            drive(&mut trial, |trial, state| {
                let TrialState::Replacing(chosen) = state else {
                    return;
                };
                let Score::Active(picked) = trial.items()[chosen].score else {
                    panic!("{policy:?}: selected an exhausted item");
                };
                for (idx, item) in trial.items().iter().enumerate() {
                    if let Score::Active(other) = item.score {
                        assert!(picked <= other, "{policy:?}: {picked} > {other}");
                        if idx < chosen {
                            assert!(picked < other, "{policy:?}: tie not broken by index");
                        }
                    }
                }
            });
        }
    }
}

// ════════════════════════════════════════════════════════════
// INVARIANT FAMILY 2: Depth monotonicity and exhaustion
// ════════════════════════════════════════════════════════════

#[test]
fn depth_is_monotone_and_bounded_for_single_query_policies() {
    let mut rng = SeededRng::new(99);
    let targets = random_targets(&mut rng, 8);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
    for (policy, depth) in policy_grid() {
        let bound = depth.max(policy.depth_cost());
        let mut trial = Trial::new(&task, plan(policy, 5.0), 3);
        let mut last: Vec<u32> = vec![0; targets.len()];
        drive(&mut trial, |trial, _| {
            for (idx, item) in trial.items().iter().enumerate() {
                assert!(item.depth >= last[idx], "{policy:?}: depth decreased");
                assert!(item.depth <= bound, "{policy:?}: depth {} > {bound}", item.depth);
                last[idx] = item.depth;
            }
        });
        if !policy.exhausts_on_apply() {
            assert!(last.iter().all(|d| *d <= depth));
        }
    }
}

#[test]
fn exhausted_items_are_never_selected_again() {
    let mut rng = SeededRng::new(7);
    let targets = random_targets(&mut rng, 9);
    let task = ReferringTask::new(&targets, ScoringMethod::Entropy).expect("task");
    for (policy, depth) in policy_grid() {
        let mut trial = Trial::new(&task, plan(policy, 4.0), 11);
        let mut exhausted = vec![false; targets.len()];
        drive(&mut trial, |trial, state| {
            if let TrialState::Replacing(item) = state {
                assert!(!exhausted[item], "{policy:?}: re-selected exhausted item {item}");
            }
            for (idx, item) in trial.items().iter().enumerate() {
                if item.depth >= depth {
                    assert_eq!(item.score, Score::Exhausted);
                }
                if item.score.is_exhausted() {
                    exhausted[idx] = true;
                }
            }
        });
    }
}

#[test]
fn policy_depth_parameter_governs_exhaustion() {
    let mut rng = SeededRng::new(13);
    let targets = random_targets(&mut rng, 3);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");

    // A pinned suffix outranks the swept constraint it is resolved at.
    let pinned: PolicySpec = "naive_3".parse().expect("policy");
    let policy = pinned.resolve(1);
    assert_eq!(policy, ReplacementPolicy::Naive { max_depth: 3 });

    let mut trial = Trial::new(&task, plan(policy, 10.0), 9);
    drive(&mut trial, |_, _| {});
    assert!(trial.items().iter().all(|item| item.depth == 3));
    let trajectory = trial.run().expect("finish");
    assert_eq!(trajectory.replacements, 9);
    assert_eq!(trajectory.requeries, 9);
}

#[test]
fn ensemble_overshoots_depth_and_exhausts_in_one_step() {
    let mut rng = SeededRng::new(5);
    let targets = random_targets(&mut rng, 4);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
    let mut trial = Trial::new(&task, plan(ReplacementPolicy::EnsembleMean { size: 3 }, 1.0), 1);

    assert_eq!(trial.advance().expect("init"), TrialState::Selecting);
    let TrialState::Replacing(item) = trial.advance().expect("select") else {
        panic!("expected a replacement");
    };
    assert_eq!(trial.items()[item].depth, 0);
    trial.advance().expect("replace");
    // Swept at constraint 2, a size-3 ensemble still spends all three.
    assert_eq!(trial.items()[item].depth, 3);
    assert_eq!(trial.items()[item].score, Score::Exhausted);
}

// ════════════════════════════════════════════════════════════
// INVARIANT FAMILY 3: Trajectory shape and coverage
// ════════════════════════════════════════════════════════════

#[test]
fn three_items_naive_depth_one_takes_three_steps() {
    let mut rng = SeededRng::new(3);
    let targets = random_targets(&mut rng, 3);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
    let trajectory = Trial::new(&task, plan(ReplacementPolicy::Naive { max_depth: 1 }, 1.0), 9)
        .run()
        .expect("run");
    assert_eq!(trajectory.replacements, 3);
    assert_eq!(trajectory.requeries, 3);
    assert_eq!(trajectory.errors.len(), 4);
    assert_eq!(trajectory.carried_from, None);
}

#[test]
fn tracking_naive_depth_one_takes_three_steps() {
    let videos = tiny_videos(3);
    let params = tiny_tracking();
    let task = TrackingTask::new(&videos, &params);
    let trajectory = Trial::new(&task, plan(ReplacementPolicy::Naive { max_depth: 1 }, 1.0), 4)
        .run()
        .expect("run");
    assert_eq!(trajectory.replacements, 3);
    assert_eq!(trajectory.errors.len(), 4);
    assert!(trajectory.errors.iter().all(|e| (0.0..=1.0).contains(e)));
}

#[test]
fn trajectories_always_span_the_whole_budget() {
    let mut rng = SeededRng::new(2024);
    let targets = random_targets(&mut rng, 7);
    let task = ReferringTask::new(&targets, ScoringMethod::Margin).expect("task");
    for max_rqr in [0.3, 1.0, 2.5, 10.0] {
        for (policy, depth) in policy_grid() {
            let trial = Trial::new(&task, plan(policy, max_rqr), 17);
            let budget = trial.budget();
            let trajectory = trial.run().expect("run");
            assert_eq!(trajectory.errors.len(), budget + 1, "{policy:?} rqr {max_rqr}");
            assert!(trajectory.errors.iter().all(|e| (0.0..=1.0).contains(e)));
            if let Some(from) = trajectory.carried_from {
                let tail = trajectory.errors[from - 1];
                assert!(trajectory.errors[from..].iter().all(|e| *e == tail));
            }
        }
    }
}

#[test]
fn generous_budget_runs_until_every_item_is_exhausted() {
    let mut rng = SeededRng::new(77);
    let targets = random_targets(&mut rng, 6);
    let task = ReferringTask::new(&targets, ScoringMethod::Entropy).expect("task");
    for (policy, depth) in policy_grid() {
        let mut trial = Trial::new(&task, plan(policy, 10.0), 5);
        drive(&mut trial, |_, _| {});
        assert!(
            trial.items().iter().all(|item| item.score.is_exhausted()),
            "{policy:?} at depth {depth} left items selectable"
        );
        let trajectory = trial.run().expect("finish");
        assert_eq!(trajectory.errors.len(), 61);
        assert!(trajectory.carried_from.is_some());
    }
}

#[test]
fn ensemble_cost_repeats_snapshots_and_truncates_at_budget() {
    let mut rng = SeededRng::new(8);
    let targets = random_targets(&mut rng, 2);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
    let trajectory = Trial::new(
        &task,
        plan(ReplacementPolicy::EnsembleConsensus { size: 3 }, 1.0),
        2,
    )
    .run()
    .expect("run");
    assert_eq!(trajectory.replacements, 1);
    assert_eq!(trajectory.requeries, 3);
    assert_eq!(trajectory.errors.len(), 3);
    assert_eq!(trajectory.errors[1], trajectory.errors[2]);
}

// ════════════════════════════════════════════════════════════
// INVARIANT FAMILY 4: Renormalization after every replacement
// ════════════════════════════════════════════════════════════

#[test]
fn discrete_beliefs_stay_normalized() {
    let mut rng = SeededRng::new(31337);
    let targets = random_targets(&mut rng, 10);
    let task = ReferringTask::new(&targets, ScoringMethod::Entropy).expect("task");
    for (policy, depth) in policy_grid() {
        let mut trial = Trial::new(&task, plan(policy, 3.0), 23);
        drive(&mut trial, |trial, _| {
            for item in trial.items() {
                let total: f64 = item.belief.probabilities.iter().sum();
                assert!((total - 1.0).abs() < 1e-6, "{policy:?}: mass {total}");
                assert!(item.belief.probabilities.iter().all(|p| *p >= 0.0));
            }
        });
    }
}

// ════════════════════════════════════════════════════════════
// INVARIANT FAMILY 5: Disjoint-range merges
// ════════════════════════════════════════════════════════════

#[test]
fn three_way_range_split_merges_to_the_full_run() {
    let mut rng = SeededRng::new(555);
    let targets = random_targets(&mut rng, 8);
    let task = ReferringTask::new(&targets, ScoringMethod::MaxProb).expect("task");
    let sim = |trials: usize, trial_offset: usize| SimulationConfig {
        trials,
        trial_offset,
        total_trials: 9,
        depth_constraints: vec![1, 3],
        ..SimulationConfig::default()
    };
    for name in POLICY_NAMES {
        let spec: PolicySpec = name.parse().expect("policy");
        let full = run_range(&task, spec, "refexp", &sim(9, 0), 3).expect("full");
        let parts: Vec<_> = [(0, 3), (3, 3), (6, 3)]
            .into_iter()
            .map(|(offset, n)| run_range(&task, spec, "refexp", &sim(n, offset), 2).expect("part"))
            .collect();
        let left = parts[0]
            .merge(&parts[1])
            .and_then(|ab| ab.merge(&parts[2]))
            .expect("left");
        let right = parts[2]
            .merge(&parts[0])
            .and_then(|ca| parts[1].merge(&ca))
            .expect("right");
        assert_eq!(left.digest(), full.digest(), "{name}");
        assert_eq!(right.digest(), full.digest(), "{name}");
    }
}
