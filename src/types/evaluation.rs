//! Outcomes of build and run jobs, and evaluation results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::job::Configuration;

/// Result of one build job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Whether the build program exited successfully.
    pub success: bool,

    /// Exit code, if the program exited normally.
    pub exit_code: Option<i32>,

    /// Combined stdout/stderr of the build program.
    pub output: String,

    /// Optimization log emitted by the compiler (empty if none).
    pub log: String,

    /// Persisted build tree that run jobs start from. Only set on success.
    pub artifact_dir: Option<PathBuf>,
}

impl BuildOutcome {
    /// Short description of a failed build, for the result's error field.
    pub fn failure_summary(&self) -> String {
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let tail: Vec<&str> = self.output.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        format!("build failed (exit {}): {}", code, tail.join(" | "))
    }
}

/// Result of one timed replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Numeric output of the program, when it produced one.
    pub output: Option<Vec<f64>>,

    /// Wall-clock seconds; `None` marks a failed replicate.
    pub duration: Option<f64>,

    /// Why the replicate failed.
    pub failure: Option<String>,
}

impl RunOutcome {
    /// A replicate that produced output in `duration` seconds.
    pub fn success(output: Vec<f64>, duration: f64) -> Self {
        Self {
            output: Some(output),
            duration: Some(duration),
            failure: None,
        }
    }

    /// A replicate that crashed, timed out, or produced no usable output.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            output: None,
            duration: None,
            failure: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.duration.is_some() && self.output.is_some()
    }
}

/// Classification of a configuration against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The baseline itself.
    Precise,
    /// Deviation within tolerance.
    Good,
    /// Deviation outside tolerance.
    Bad,
    /// A build or run step failed outright.
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Precise => write!(f, "precise"),
            Status::Good => write!(f, "good"),
            Status::Bad => write!(f, "bad"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Evaluation of one configuration at one replication count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Configuration evaluated.
    pub config: Configuration,

    /// One entry per replicate; `None` where the replicate failed.
    pub outputs: Vec<Option<Vec<f64>>>,

    /// One entry per replicate; `None` where the replicate failed.
    pub durations: Vec<Option<f64>>,

    /// Classification.
    pub status: Status,

    /// Aggregate deviation from the baseline output, when scored.
    pub deviation: Option<f64>,

    /// Baseline mean time divided by this configuration's mean time.
    pub speedup: Option<f64>,

    /// Build or run failure description.
    pub error: Option<String>,
}

impl EvaluationResult {
    /// Mean of the successful durations.
    pub fn mean_duration(&self) -> Option<f64> {
        mean(self.durations.iter().flatten().copied())
    }

    /// Result for a configuration whose build failed; no replicates ran.
    pub fn build_error(config: Configuration, message: impl Into<String>) -> Self {
        Self {
            config,
            outputs: Vec::new(),
            durations: Vec::new(),
            status: Status::Error,
            deviation: None,
            speedup: None,
            error: Some(message.into()),
        }
    }
}

/// Arithmetic mean, `None` for an empty sequence.
pub fn mean<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
