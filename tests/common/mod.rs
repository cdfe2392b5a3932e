//! Shared harness for CLI integration tests: runs the `rqs` binary inside a
//! scratch workspace and keeps a per-case log for failure triage.

#![allow(dead_code, missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

/// Scratch directory with a config file pointing every path inside it.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write fixture");
        path
    }

    /// Config with small particle counts and the given trial window.
    pub fn write_config(&self, name: &str, trials: usize, offset: usize, output: &str) -> PathBuf {
        let root = self.path().display();
        self.write(
            name,
            &format!(
                r#"
[simulation]
trials = {trials}
trial_offset = {offset}
total_trials = 4
depth_constraints = [1, 2]
seed = 11
workers = 2

[tracking]
num_particles = 24
num_score_samples = 12

[paths]
tracking_store = "{root}/tracking.json"
referring_store = "{root}/referring.json"
output_dir = "{root}/{output}"
"#
            ),
        )
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str], env: &[(&str, &Path)]) -> CmdResult {
    let mut command = Command::new(env!("CARGO_BIN_EXE_rqs"));
    command
        .args(args)
        .env_remove("RQS_CONFIG")
        .env_remove("RQS_SEED")
        .env_remove("RQS_WORKERS")
        .env_remove("RQS_TRIALS")
        .env_remove("RQS_OUTPUT_DIR")
        .env("RQS_LOG", "warn");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("spawn rqs");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("cli-logs");
    fs::create_dir_all(&log_dir).expect("log dir");
    let log_path = log_dir.join(format!("{case_name}.log"));
    fs::write(
        &log_path,
        format!(
            "args: {args:?}\nstatus: {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
            output.status
        ),
    )
    .expect("write log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

pub const REFERRING_STORE: &str = r#"{
  "splits": {
    "val": {
      "t0": {
        "ground_truth": {"x": 0, "y": 0, "w": 10, "h": 10},
        "detections": [{"x": 0, "y": 0, "w": 10, "h": 10}, {"x": 50, "y": 50, "w": 10, "h": 10}],
        "evidence": [
          {"probabilities": [0.9, 0.1], "failure_mode": "correct"},
          {"probabilities": [0.3, 0.7], "failure_mode": "misunderstood"}
        ]
      },
      "t1": {
        "ground_truth": {"x": 0, "y": 0, "w": 10, "h": 10},
        "detections": [{"x": 0, "y": 0, "w": 10, "h": 10}, {"x": 50, "y": 50, "w": 10, "h": 10}],
        "evidence": [
          {"probabilities": [0.55, 0.45], "failure_mode": "correct"},
          {"probabilities": [0.2, 0.8], "failure_mode": "ambiguous"}
        ]
      },
      "t2": {
        "ground_truth": {"x": 0, "y": 0, "w": 10, "h": 10},
        "detections": [{"x": 90, "y": 90, "w": 10, "h": 10}],
        "evidence": [
          {"probabilities": [1.0], "failure_mode": "missed_detection"}
        ]
      }
    }
  }
}"#;

const UNIT_COV: &str = "[[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]";

fn mixture(x: f64) -> String {
    format!(r#"{{"weights": [1.0], "means": [[{x}, 0, 10, 10]], "covariances": [{UNIT_COV}]}}"#)
}

/// Two videos of two frames, each with an accurate and a shifted annotator.
pub fn tracking_store() -> String {
    let frames = |x: f64| format!("[{}, {}]", mixture(x), mixture(x));
    let video = format!(
        r#"{{"ground_truth": [{{"x": 0, "y": 0, "w": 10, "h": 10}}, {{"x": 0, "y": 0, "w": 10, "h": 10}}],
            "sources": {{"good": {}, "shifted": {}}}}}"#,
        frames(0.0),
        frames(6.0)
    );
    format!(r#"{{"videos": {{"Walking": {video}, "Crossing": {video}}}}}"#)
}
