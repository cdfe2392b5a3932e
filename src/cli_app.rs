//! Top-level CLI definition and dispatch.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::baseline::{deferral_free, oracle_best};
use crate::core::config::Config;
use crate::core::errors::{Result, RqsError};
use crate::deferral::DeferralTask;
use crate::metrics::{ResultArray, result_key};
use crate::policy::PolicySpec;
use crate::runner::run_range;
use crate::scoring::ScoringMethod;
use crate::store::{ReferringStore, TrackingStore};
use crate::task::{ReferringTask, TrackingTask};

const MERGED_DIR: &str = "merged";

/// Re-query simulator: deferral policy curves for tracking and referring
/// expressions.
#[derive(Parser)]
#[command(name = "rqs", version, about)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Simulate re-queries on tracked videos (scored by sampled particle IoU).
    Track {
        /// Replacement policy, e.g. `naive`, `smart_3`, `ensemble_mean`.
        replacement: String,
        /// Run label appended to the result key.
        run: String,
    },
    /// Simulate re-queries on referring-expression targets of one split.
    Refexp {
        /// Scoring method: `max_prob`, `entropy`, or `margin`.
        scoring: String,
        /// Replacement policy, e.g. `combined`, `ensemble_consensus_3`.
        replacement: String,
        /// Dataset split in the referring store.
        split: String,
        /// Optional run label appended to the result key.
        run: Option<String>,
    },
    /// Merge partial result arrays in a directory into `<dir>/merged/`.
    Merge {
        /// Directory holding per-process output directories.
        dir: PathBuf,
    },
    /// Report deferral-free and oracle error for a task.
    Baseline {
        /// Task to summarize.
        task: TaskName,
        /// Split (referring expressions only).
        split: Option<String>,
    },
    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

/// Task selector for `rqs baseline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskName {
    /// Particle-cloud tracking over videos.
    Track,
    /// Referring-expression targets of one split.
    Refexp,
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Track { replacement, run } => run_tracking(replacement, run),
        Command::Refexp {
            scoring,
            replacement,
            split,
            run,
        } => run_referring(scoring, replacement, split, run.as_deref().unwrap_or("")),
        Command::Merge { dir } => merge_dir(dir),
        Command::Baseline { task, split } => run_baseline(*task, split.as_deref()),
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "rqs", &mut io::stdout());
            Ok(())
        }
    }
}

fn run_tracking(replacement: &str, run: &str) -> Result<()> {
    let spec: PolicySpec = replacement.parse()?;
    let config = Config::load()?;
    let store = TrackingStore::load(&config.paths.tracking_store)?;
    let task = TrackingTask::new(&store.videos, &config.tracking);
    let policy = spec.to_string();
    let key = result_key(&[
        task.label(),
        ScoringMethod::SampledIou.name(),
        &policy,
        "",
        run,
    ]);
    let array = run_range(
        &task,
        spec,
        &key,
        &config.simulation,
        config.effective_workers(),
    )?;
    let path = array.save(&config.paths.output_dir)?;
    print_summary(&array, &path);
    Ok(())
}

fn run_referring(scoring: &str, replacement: &str, split: &str, run: &str) -> Result<()> {
    let scoring: ScoringMethod = scoring.parse()?;
    let spec: PolicySpec = replacement.parse()?;
    let config = Config::load()?;
    let store = ReferringStore::load(&config.paths.referring_store)?;
    let targets = match store.split(split) {
        Ok(targets) => targets,
        Err(err @ RqsError::DataUnavailable { .. }) => {
            let available: Vec<&str> = store.split_names().collect();
            tracing::warn!(split, ?available, error = %err, "split unavailable, no results written");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let task = ReferringTask::new(targets, scoring)?;
    let policy = spec.to_string();
    let key = result_key(&[task.label(), scoring.name(), &policy, split, run]);
    let array = run_range(
        &task,
        spec,
        &key,
        &config.simulation,
        config.effective_workers(),
    )?;
    let path = array.save(&config.paths.output_dir)?;
    print_summary(&array, &path);
    Ok(())
}

/// Result files under `dir`, recursively, skipping earlier merge output.
fn collect_result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut paths = Vec::new();
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|err| RqsError::io(&current, err))?;
        for entry in entries {
            let path = entry.map_err(|err| RqsError::io(&current, err))?.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|name| name != MERGED_DIR) {
                    pending.push(path);
                }
            } else if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}

/// Partial runs write to separate output directories under `dir`; every
/// array found is merged by key into `<dir>/merged/`.
fn merge_dir(dir: &Path) -> Result<()> {
    let paths = collect_result_files(dir)?;

    let mut merged: BTreeMap<String, ResultArray> = BTreeMap::new();
    for path in &paths {
        let array = ResultArray::load(path)?;
        let combined = match merged.remove(&array.key) {
            Some(existing) => existing.merge(&array)?,
            None => array,
        };
        merged.insert(combined.key.clone(), combined);
    }
    if merged.is_empty() {
        tracing::warn!(dir = %dir.display(), "no result arrays found");
        return Ok(());
    }

    let out_dir = dir.join(MERGED_DIR);
    for mut array in merged.into_values() {
        array.backfill();
        let path = array.save(&out_dir)?;
        print_summary(&array, &path);
    }
    tracing::info!(inputs = paths.len(), "merge complete");
    Ok(())
}

fn run_baseline(task: TaskName, split: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let mut rng = StdRng::seed_from_u64(config.simulation.seed);
    match task {
        TaskName::Track => {
            let store = TrackingStore::load(&config.paths.tracking_store)?;
            let task = TrackingTask::new(&store.videos, &config.tracking);
            report_baseline(&task, config.simulation.trials, &mut rng)
        }
        TaskName::Refexp => {
            let split = split.ok_or_else(|| RqsError::InvalidConfig {
                details: "refexp baseline needs a split".to_string(),
            })?;
            let store = ReferringStore::load(&config.paths.referring_store)?;
            let task = ReferringTask::new(store.split(split)?, ScoringMethod::MaxProb)?;
            report_baseline(&task, config.simulation.trials, &mut rng)
        }
    }
}

fn report_baseline<T: DeferralTask>(task: &T, trials: usize, rng: &mut StdRng) -> Result<()> {
    let free = deferral_free(task, trials, rng)?;
    let oracle = oracle_best(task, rng)?;
    println!("{}", format!("{} baseline", task.label()).bold());
    println!(
        "  deferral-free error: {:.4} ± {:.4} ({} trials)",
        free.mean, free.stderr, free.trials
    );
    println!("  deferral-free acc.:  {:.4}", free.accuracy);
    println!("  oracle error:        {oracle:.4}");
    Ok(())
}

fn print_summary(array: &ResultArray, path: &Path) {
    println!("{} {}", array.key.bold(), path.display().to_string().dimmed());
    for (idx, depth) in array.depth_constraints.iter().enumerate() {
        let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        println!(
            "  depth {depth:>2}: trials {:>4}  auc {}  final {}",
            array.recorded_trials(idx),
            fmt(array.area_under_curve(idx)),
            fmt(array.error_at_full_rqr(idx)),
        );
    }
    if !array.dropped.is_empty() {
        println!(
            "  {}",
            format!("{} trials dropped", array.dropped.len()).yellow()
        );
    }
    println!("  digest {}", array.digest());
}
