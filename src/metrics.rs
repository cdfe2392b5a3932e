//! Fixed-shape result arrays indexed by `[depth constraint × step × trial]`.
//!
//! Separate invocations fill disjoint trial ranges of the same array and are
//! combined with [`ResultArray::merge`]. Unrecorded slots are `None`, never
//! zero, so a merge can tell "not run here" from "zero error".

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{Result, RqsError};
use crate::deferral::Trajectory;

/// A trial that failed locally and contributed no trajectory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DroppedTrial {
    /// Depth constraint the trial ran at.
    pub depth_constraint: u32,
    /// Global trial index.
    pub trial: usize,
    /// Error code, e.g. `RQS-2002`.
    pub code: String,
    /// Rendered error message.
    pub reason: String,
}

/// Mean-error trajectories for one policy on one task, across depth
/// constraints and trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArray {
    /// Result key, also the file stem.
    pub key: String,
    /// Depth constraint of each depth row.
    pub depth_constraints: Vec<u32>,
    /// Points per trajectory (`budget + 1`).
    pub steps: usize,
    /// Total trial columns across all partial runs.
    pub trials: usize,
    values: Vec<Option<f64>>,
    /// Trials that failed, sorted.
    #[serde(default)]
    pub dropped: Vec<DroppedTrial>,
    /// Creation time; merges keep the latest.
    pub created_at: DateTime<Utc>,
}

/// `<task>-<scoring>-<policy>-<split>-<run>` with empty parts skipped.
#[must_use]
pub fn result_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-")
}

impl ResultArray {
    /// Empty array with every slot unrecorded.
    #[must_use]
    pub fn new(key: impl Into<String>, depth_constraints: Vec<u32>, steps: usize, trials: usize) -> Self {
        let len = depth_constraints.len() * steps * trials;
        Self {
            key: key.into(),
            depth_constraints,
            steps,
            trials,
            values: vec![None; len],
            dropped: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn index(&self, depth: usize, step: usize, trial: usize) -> usize {
        (depth * self.steps + step) * self.trials + trial
    }

    /// Recorded value, or `None` when unrecorded or out of range.
    #[must_use]
    pub fn get(&self, depth: usize, step: usize, trial: usize) -> Option<f64> {
        if depth >= self.depth_constraints.len() || step >= self.steps || trial >= self.trials {
            return None;
        }
        self.values[self.index(depth, step, trial)]
    }

    /// Store one trial's trajectory in its column.
    pub fn record(&mut self, depth: usize, trial: usize, trajectory: &Trajectory) -> Result<()> {
        if depth >= self.depth_constraints.len() || trial >= self.trials {
            return Err(RqsError::Runtime {
                details: format!(
                    "slot (depth #{depth}, trial {trial}) outside {}×{}",
                    self.depth_constraints.len(),
                    self.trials
                ),
            });
        }
        if trajectory.errors.len() > self.steps {
            return Err(RqsError::Runtime {
                details: format!(
                    "trajectory has {} points, array holds {}",
                    trajectory.errors.len(),
                    self.steps
                ),
            });
        }
        for (step, value) in trajectory.errors.iter().enumerate() {
            let idx = self.index(depth, step, trial);
            if self.values[idx].is_some() {
                return Err(RqsError::MergeConflict {
                    details: format!("{}: slot ({depth}, {step}, {trial}) already recorded", self.key),
                });
            }
            self.values[idx] = Some(*value);
        }
        Ok(())
    }

    /// Note a failed trial, keeping the list sorted.
    pub fn record_dropped(&mut self, dropped: DroppedTrial) {
        self.dropped.push(dropped);
        self.dropped.sort();
    }

    /// Fill unrecorded steps of every recorded trial column from the step
    /// before it.
    pub fn backfill(&mut self) {
        for depth in 0..self.depth_constraints.len() {
            for trial in 0..self.trials {
                for step in 1..self.steps {
                    let idx = self.index(depth, step, trial);
                    if self.values[idx].is_none() {
                        self.values[idx] = self.values[self.index(depth, step - 1, trial)];
                    }
                }
            }
        }
    }

    /// Union of two arrays over disjoint slots.
    pub fn merge(&self, other: &Self) -> Result<Self> {
        if self.key != other.key
            || self.depth_constraints != other.depth_constraints
            || self.steps != other.steps
            || self.trials != other.trials
        {
            return Err(RqsError::MergeConflict {
                details: format!(
                    "{} {:?}×{}×{} vs {} {:?}×{}×{}",
                    self.key,
                    self.depth_constraints,
                    self.steps,
                    self.trials,
                    other.key,
                    other.depth_constraints,
                    other.steps,
                    other.trials
                ),
            });
        }
        let mut values = Vec::with_capacity(self.values.len());
        for (idx, (a, b)) in self.values.iter().zip(&other.values).enumerate() {
            values.push(match (a, b) {
                (Some(_), Some(_)) => {
                    let trial = idx % self.trials;
                    let step = (idx / self.trials) % self.steps;
                    let depth = idx / (self.trials * self.steps);
                    return Err(RqsError::MergeConflict {
                        details: format!(
                            "{}: both arrays hold slot ({depth}, {step}, {trial})",
                            self.key
                        ),
                    });
                }
                (Some(v), None) | (None, Some(v)) => Some(*v),
                (None, None) => None,
            });
        }
        let mut dropped: Vec<DroppedTrial> =
            self.dropped.iter().chain(&other.dropped).cloned().collect();
        dropped.sort();
        Ok(Self {
            key: self.key.clone(),
            depth_constraints: self.depth_constraints.clone(),
            steps: self.steps,
            trials: self.trials,
            values,
            dropped,
            created_at: self.created_at.max(other.created_at),
        })
    }

    /// Trials with at least one recorded value at this depth.
    #[must_use]
    pub fn recorded_trials(&self, depth: usize) -> usize {
        (0..self.trials)
            .filter(|trial| (0..self.steps).any(|step| self.get(depth, step, *trial).is_some()))
            .count()
    }

    /// Mean error per step over recorded trials.
    #[must_use]
    pub fn mean_curve(&self, depth: usize) -> Vec<Option<f64>> {
        (0..self.steps)
            .map(|step| {
                let recorded: Vec<f64> = (0..self.trials)
                    .filter_map(|trial| self.get(depth, step, trial))
                    .collect();
                if recorded.is_empty() {
                    None
                } else {
                    Some(recorded.iter().sum::<f64>() / recorded.len() as f64)
                }
            })
            .collect()
    }

    /// Mean of the mean curve over steps: the area under the error-vs-RQR
    /// curve for an RQR axis normalized to `[0, 1]`.
    #[must_use]
    pub fn area_under_curve(&self, depth: usize) -> Option<f64> {
        let curve: Vec<f64> = self.mean_curve(depth).into_iter().flatten().collect();
        if curve.is_empty() {
            None
        } else {
            Some(curve.iter().sum::<f64>() / curve.len() as f64)
        }
    }

    /// Mean error once the whole budget is spent.
    #[must_use]
    pub fn error_at_full_rqr(&self, depth: usize) -> Option<f64> {
        self.mean_curve(depth).last().copied().flatten()
    }

    /// Hex SHA-256 over the key, shape, and every slot.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        for depth in &self.depth_constraints {
            hasher.update(depth.to_le_bytes());
        }
        hasher.update((self.steps as u64).to_le_bytes());
        hasher.update((self.trials as u64).to_le_bytes());
        for value in &self.values {
            match value {
                Some(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_bits().to_le_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(&mut out, "{byte:02x}");
        }
        out
    }

    /// Write to `<dir>/<key>.json`, creating `dir` if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|err| RqsError::io(dir, err))?;
        let path = dir.join(format!("{}.json", self.key));
        let json = serde_json::to_string(self)?;
        fs::write(&path, json).map_err(|err| RqsError::io(&path, err))?;
        Ok(path)
    }

    /// Read an array written by [`ResultArray::save`], checking its shape.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| RqsError::io(path, err))?;
        let array: Self = serde_json::from_str(&raw)?;
        let expected = array.depth_constraints.len() * array.steps * array.trials;
        if array.values.len() != expected {
            return Err(RqsError::Serialization {
                context: "result array",
                details: format!(
                    "{} holds {} values, shape needs {expected}",
                    path.display(),
                    array.values.len()
                ),
            });
        }
        Ok(array)
    }
}
