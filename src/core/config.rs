//! TOML configuration with environment overrides.
//!
//! Resolution order (highest first): `RQS_*` environment variables, the file
//! named by `RQS_CONFIG`, `./rqs.toml`, built-in defaults.

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{Result, RqsError};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "RQS_CONFIG";

/// File looked up in the working directory when `RQS_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "rqs.toml";

/// Full runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trial layout and scheduling.
    pub simulation: SimulationConfig,
    /// Particle-filter parameters.
    pub tracking: TrackingConfig,
    /// Input stores and output location.
    pub paths: PathsConfig,
}

/// Trial layout and scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Trials run by this invocation for every depth constraint.
    pub trials: usize,
    /// Index of the first trial, so separate processes fill disjoint ranges.
    pub trial_offset: usize,
    /// Total trial slots in the result array.
    pub total_trials: usize,
    /// Depth constraints swept when the policy name carries no parameter.
    pub depth_constraints: Vec<u32>,
    /// Re-query budget as a fraction of the item count.
    pub max_rqr: f64,
    /// Base seed; each trial derives its own stream from it.
    pub seed: u64,
    /// Worker threads; 0 means one per available core.
    pub workers: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 100,
            trial_offset: 0,
            total_trials: 100,
            depth_constraints: (1..=10).collect(),
            max_rqr: 1.0,
            seed: 0x5EED_D3F3,
            workers: 0,
        }
    }
}

/// Particle-filter parameters for the tracking task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Particles drawn per frame for a fresh belief.
    pub num_particles: usize,
    /// Particle pairs sampled per frame when scoring.
    pub num_score_samples: usize,
    /// Per-coordinate standard deviation of the smearing noise (x, y, w, h).
    pub smear_stdevs: [f64; 4],
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            num_particles: 10_000,
            num_score_samples: 500,
            smear_stdevs: [7.0; 4],
        }
    }
}

/// Input stores and output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON store of per-annotator track mixtures.
    pub tracking_store: PathBuf,
    /// JSON store of referring-expression outputs by split.
    pub referring_store: PathBuf,
    /// Directory result arrays are written to.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tracking_store: PathBuf::from("data/tracking_store.json"),
            referring_store: PathBuf::from("data/referring_store.json"),
            output_dir: PathBuf::from("results"),
        }
    }
}

impl Config {
    /// Load from the process environment and the conventional file locations.
    pub fn load() -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let explicit = env.get(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(&env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one TOML file. A missing file is an error here; callers decide
    /// whether absence is acceptable.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RqsError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|err| RqsError::io(path, err))?;
        Self::from_toml(&raw)
    }

    /// Parse a config document without applying env overrides.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `RQS_SEED`, `RQS_WORKERS`, `RQS_TRIALS`, `RQS_OUTPUT_DIR`.
    pub fn apply_env_overrides<S: BuildHasher>(
        &mut self,
        env: &HashMap<String, String, S>,
    ) -> Result<Vec<String>> {
        let mut keys_used = Vec::new();

        if let Some(value) = env.get("RQS_SEED") {
            self.simulation.seed = parse_number(value, "simulation.seed")?;
            keys_used.push("RQS_SEED".to_string());
        }
        if let Some(value) = env.get("RQS_WORKERS") {
            self.simulation.workers = parse_number(value, "simulation.workers")?;
            keys_used.push("RQS_WORKERS".to_string());
        }
        if let Some(value) = env.get("RQS_TRIALS") {
            self.simulation.trials = parse_number(value, "simulation.trials")?;
            keys_used.push("RQS_TRIALS".to_string());
        }
        if let Some(value) = env.get("RQS_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(value);
            keys_used.push("RQS_OUTPUT_DIR".to_string());
        }

        Ok(keys_used)
    }

    /// Reject configurations no trial could run under.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if sim.trials == 0 {
            return Err(invalid("simulation.trials must be at least 1"));
        }
        if sim.trial_offset + sim.trials > sim.total_trials {
            return Err(invalid(format!(
                "trial range {}..{} exceeds total_trials {}",
                sim.trial_offset,
                sim.trial_offset + sim.trials,
                sim.total_trials
            )));
        }
        if sim.depth_constraints.is_empty() {
            return Err(invalid("simulation.depth_constraints must not be empty"));
        }
        if sim.depth_constraints.contains(&0) {
            return Err(invalid("simulation.depth_constraints must be positive"));
        }
        if !(sim.max_rqr.is_finite() && sim.max_rqr > 0.0) {
            return Err(invalid("simulation.max_rqr must be a positive number"));
        }

        let tracking = &self.tracking;
        if tracking.num_particles < 2 {
            return Err(invalid("tracking.num_particles must be at least 2"));
        }
        if tracking.num_score_samples == 0 {
            return Err(invalid("tracking.num_score_samples must be at least 1"));
        }
        if tracking
            .smear_stdevs
            .iter()
            .any(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(invalid("tracking.smear_stdevs must be finite and non-negative"));
        }
        Ok(())
    }

    /// Worker count with the `0 = all cores` convention resolved.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.simulation.workers > 0 {
            return self.simulation.workers;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

fn invalid(details: impl Into<String>) -> RqsError {
    RqsError::InvalidConfig {
        details: details.into(),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| invalid(format!("{field}: expected unsigned integer, got {value:?}")))
}
