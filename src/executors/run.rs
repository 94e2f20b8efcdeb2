//! Timed run jobs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{launch_error, tail, JobHandler};
use crate::sandbox::{Populate, Sandbox};
use crate::types::config::Settings;
use crate::types::evaluation::RunOutcome;
use crate::types::job::{Configuration, Job};
use crate::{AcceptError, AcceptResult};

/// Handler name for run jobs.
pub const RUN_JOB: &str = "run";

/// Which pass a replicate belongs to. Part of the fingerprint, so
/// verification replicates never reuse exploration timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Search,
    Test,
}

/// Everything a worker needs to time one replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArgs {
    /// Persisted build tree to start from.
    pub artifact_dir: PathBuf,

    /// Configuration the build tree was made with.
    pub config: Configuration,

    /// Replicate index within the pass.
    pub rep: usize,

    pub phase: Phase,

    pub command: String,
    pub args: Vec<String>,

    /// File holding the program's numeric output.
    pub output_file: String,

    pub timeout_secs: u64,

    /// Leave the sandbox behind.
    pub keep: bool,
}

impl RunArgs {
    /// Replicate `rep` of `config`, run from `artifact_dir`.
    pub fn new(
        artifact_dir: &Path,
        config: Configuration,
        rep: usize,
        phase: Phase,
        settings: &Settings,
    ) -> Self {
        let run = &settings.config.run;
        Self {
            artifact_dir: artifact_dir.to_path_buf(),
            config,
            rep,
            phase,
            command: run.command.clone(),
            args: run.args.clone(),
            output_file: run.output_file.clone(),
            timeout_secs: run.timeout_secs,
            keep: settings.keep_sandboxes,
        }
    }

    pub fn job(&self) -> AcceptResult<Job> {
        Job::new(RUN_JOB, self)
    }
}

/// Executes one replicate in a sandbox copied from the build tree.
///
/// A crash, timeout, non-zero exit or unreadable output yields a
/// [`RunOutcome`] without a duration instead of an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunHandler;

#[async_trait]
impl JobHandler for RunHandler {
    fn name(&self) -> &str {
        RUN_JOB
    }

    async fn execute(&self, job: &Job) -> AcceptResult<Value> {
        let args: RunArgs = job.decode_args()?;
        let outcome = run(&args).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

async fn run(args: &RunArgs) -> AcceptResult<RunOutcome> {
    if !args.artifact_dir.is_dir() {
        return Err(AcceptError::user(format!(
            "build tree {} is gone; rerun with --force to rebuild",
            args.artifact_dir.display()
        )));
    }

    let sandbox = Sandbox::enter_from(&args.artifact_dir, Populate::Copy, args.keep)?;
    let output_path = sandbox.join(&args.output_file);
    if output_path.exists() {
        std::fs::remove_file(&output_path)?;
    }

    tracing::debug!(config = %args.config, rep = args.rep, phase = ?args.phase, "replicate started");

    let child = sandbox
        .command(&args.command)
        .args(&args.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| launch_error(&args.command, e))?;

    let start = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        child.wait_with_output(),
    )
    .await;
    let elapsed = start.elapsed().as_secs_f64();

    let outcome = match result {
        Ok(Ok(output)) if output.status.success() => match load_output(&output_path) {
            Ok(values) => RunOutcome::success(values, elapsed),
            Err(reason) => RunOutcome::failed(reason),
        },
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| format!("exit code {c}"))
                .unwrap_or_else(|| "killed by signal".to_string());
            RunOutcome::failed(format!("{}: {}", code, tail(&stderr, 3)))
        }
        Ok(Err(e)) => RunOutcome::failed(format!("wait failed: {e}")),
        // The child is killed when its handle drops with the timed-out future.
        Err(_) => RunOutcome::failed(format!("timed out after {}s", args.timeout_secs)),
    };

    match &outcome.failure {
        Some(reason) => tracing::info!(config = %args.config, rep = args.rep, reason = %reason, "replicate failed"),
        None => tracing::debug!(config = %args.config, rep = args.rep, secs = elapsed, "replicate finished"),
    }

    sandbox.exit();
    Ok(outcome)
}

/// Reads numeric output: the first whitespace-separated token of every
/// non-empty line.
pub fn load_output(path: &Path) -> Result<Vec<f64>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("no output at {}: {}", path.display(), e))?;
    parse_output(&text)
}

fn parse_output(text: &str) -> Result<Vec<f64>, String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .enumerate()
        .map(|(i, token)| {
            token
                .parse::<f64>()
                .map_err(|_| format!("output line {} is not a number: {:?}", i + 1, token))
        })
        .collect()
}
