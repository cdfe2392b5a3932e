//! Parallel fan-out of independent trials.
//!
//! Work units are `(depth constraint, trial)` pairs. A fixed pool of scoped
//! worker threads pulls units from one channel and returns trajectories over
//! another; the calling thread is the only writer of the result array.

use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::core::config::SimulationConfig;
use crate::core::errors::{Result, RqsError};
use crate::deferral::{DeferralTask, Trajectory, Trial, TrialPlan, requery_budget, trial_seed};
use crate::metrics::{DroppedTrial, ResultArray};
use crate::policy::PolicySpec;

#[derive(Debug, Clone, Copy)]
struct WorkUnit {
    depth_index: usize,
    depth_constraint: u32,
    trial: usize,
}

type Outcome = (WorkUnit, Result<Trajectory>);

/// Run this invocation's trial range for one policy and collect the results.
///
/// Trial-local failures are logged and recorded as dropped; any other failure
/// aborts the run.
pub fn run_range<T: DeferralTask>(
    task: &T,
    spec: PolicySpec,
    key: &str,
    sim: &SimulationConfig,
    workers: usize,
) -> Result<ResultArray> {
    let depths = spec.depth_sweep(&sim.depth_constraints);
    let steps = requery_budget(task.item_count(), sim.max_rqr) + 1;
    let mut array = ResultArray::new(key, depths.clone(), steps, sim.total_trials);

    let units: Vec<WorkUnit> = depths
        .iter()
        .enumerate()
        .flat_map(|(depth_index, depth_constraint)| {
            (sim.trial_offset..sim.trial_offset + sim.trials).map(move |trial| WorkUnit {
                depth_index,
                depth_constraint: *depth_constraint,
                trial,
            })
        })
        .collect();
    let workers = workers.clamp(1, units.len().max(1));

    tracing::info!(
        key,
        policy = %spec,
        items = task.item_count(),
        depths = depths.len(),
        trials = sim.trials,
        workers,
        "starting run"
    );

    let (work_tx, work_rx) = crossbeam_channel::unbounded::<WorkUnit>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<Outcome>();
    for unit in &units {
        work_tx.send(*unit).map_err(|_| RqsError::ChannelClosed {
            component: "runner work queue",
        })?;
    }
    drop(work_tx);

    let outcomes = thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || worker(task, spec, sim, &work_rx, &result_tx));
        }
        drop(result_tx);
        result_rx.iter().collect::<Vec<Outcome>>()
    });

    if outcomes.len() != units.len() {
        return Err(RqsError::ChannelClosed {
            component: "runner result queue",
        });
    }

    let mut completed = 0usize;
    for (unit, outcome) in outcomes {
        match outcome {
            Ok(trajectory) => {
                array.record(unit.depth_index, unit.trial, &trajectory)?;
                completed += 1;
            }
            Err(err) if err.is_trial_local() => {
                tracing::warn!(
                    key,
                    depth_constraint = unit.depth_constraint,
                    trial = unit.trial,
                    code = err.code(),
                    error = %err,
                    "trial dropped"
                );
                array.record_dropped(DroppedTrial {
                    depth_constraint: unit.depth_constraint,
                    trial: unit.trial,
                    code: err.code().to_string(),
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    tracing::info!(
        key,
        completed,
        dropped = array.dropped.len(),
        digest = %array.digest(),
        "run finished"
    );
    Ok(array)
}

fn worker<T: DeferralTask>(
    task: &T,
    spec: PolicySpec,
    sim: &SimulationConfig,
    work_rx: &Receiver<WorkUnit>,
    result_tx: &Sender<Outcome>,
) {
    while let Ok(unit) = work_rx.recv() {
        let plan = TrialPlan {
            policy: spec.resolve(unit.depth_constraint),
            max_rqr: sim.max_rqr,
        };
        let seed = trial_seed(sim.seed, unit.depth_constraint, unit.trial);
        let outcome = Trial::new(task, plan, seed).run();
        if let Ok(trajectory) = &outcome {
            tracing::debug!(
                depth_constraint = unit.depth_constraint,
                trial = unit.trial,
                replacements = trajectory.replacements,
                requeries = trajectory.requeries,
                "trial finished"
            );
        }
        if result_tx.send((unit, outcome)).is_err() {
            return;
        }
    }
}
