//! Build jobs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{launch_error, JobHandler};
use crate::cache::Fingerprint;
use crate::sandbox::{Populate, Sandbox};
use crate::types::config::Settings;
use crate::types::evaluation::BuildOutcome;
use crate::types::job::{Configuration, Job};
use crate::{AcceptError, AcceptResult};

/// Handler name for build jobs.
pub const BUILD_JOB: &str = "build";

/// Everything a worker needs to build one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArgs {
    /// Benchmark directory (absolute).
    pub appdir: PathBuf,

    /// Knob settings; empty for the precise build.
    pub config: Configuration,

    pub command: String,
    pub args: Vec<String>,

    /// Optimization log the compiler writes into the build directory.
    pub log_file: String,

    /// File receiving the knob settings.
    pub config_file: String,

    pub populate: Populate,

    /// Where successful build trees are persisted. `None` skips persisting.
    pub artifact_root: Option<PathBuf>,

    pub timeout_secs: u64,

    /// Leave the sandbox behind.
    pub keep: bool,
}

impl BuildArgs {
    /// Build of `config` for the benchmark in `appdir`, as the settings describe it.
    pub fn new(appdir: &Path, config: Configuration, settings: &Settings) -> AcceptResult<Self> {
        let build = &settings.config.build;
        Ok(Self {
            appdir: benchmark_dir(appdir)?,
            config,
            command: build.command.clone(),
            args: build.args.clone(),
            log_file: build.log_file.clone(),
            config_file: build.config_file.clone(),
            populate: Populate::Copy,
            artifact_root: Some(std::path::absolute(&settings.config.memo.artifact_dir)?),
            timeout_secs: build.timeout_secs,
            keep: settings.keep_sandboxes,
        })
    }

    /// Variant used only to look at compiler output: symlinked sandbox,
    /// nothing persisted.
    #[must_use]
    pub fn for_inspection(mut self) -> Self {
        self.populate = Populate::Symlink;
        self.artifact_root = None;
        self
    }

    pub fn job(&self) -> AcceptResult<Job> {
        Job::new(BUILD_JOB, self)
    }
}

/// Resolves and checks a benchmark directory.
pub fn benchmark_dir(appdir: &Path) -> AcceptResult<PathBuf> {
    let resolved = std::fs::canonicalize(appdir).map_err(|_| {
        AcceptError::user(format!("benchmark directory {} does not exist", appdir.display()))
    })?;
    if !resolved.is_dir() {
        return Err(AcceptError::user(format!(
            "{} is not a directory",
            appdir.display()
        )));
    }
    Ok(resolved)
}

/// Builds one configuration in a fresh sandbox.
///
/// A build that runs but fails is a normal outcome (`success = false`), not
/// an error. Errors are reserved for conditions outside the experiment, such
/// as a missing build tool or benchmark directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildHandler;

#[async_trait]
impl JobHandler for BuildHandler {
    fn name(&self) -> &str {
        BUILD_JOB
    }

    async fn execute(&self, job: &Job) -> AcceptResult<Value> {
        let args: BuildArgs = job.decode_args()?;
        let outcome = build(&args, &job.args).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

async fn build(args: &BuildArgs, raw: &Value) -> AcceptResult<BuildOutcome> {
    if !args.appdir.is_dir() {
        return Err(AcceptError::user(format!(
            "benchmark directory {} does not exist",
            args.appdir.display()
        )));
    }

    let sandbox = Sandbox::enter_from(&args.appdir, args.populate, args.keep)?;
    if args.keep {
        tracing::info!(path = %sandbox.path().display(), config = %args.config, "building in sandbox");
    }

    let log_path = sandbox.join(&args.log_file);
    if log_path.exists() {
        std::fs::remove_file(&log_path)?;
    }
    if !args.config.is_precise() {
        std::fs::write(sandbox.join(&args.config_file), args.config.to_knob_file())?;
    }

    tracing::debug!(command = %args.command, config = %args.config, "build started");
    let child = sandbox
        .command(&args.command)
        .args(&args.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| launch_error(&args.command, e))?;

    let limit = Duration::from_secs(args.timeout_secs);
    // The child is killed when its handle drops with the timed-out future.
    let (status, text) = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (Some(output.status), text)
        }
        Err(_) => (None, format!("build timed out after {}s\n", args.timeout_secs)),
    };

    let log = if log_path.exists() {
        let log = std::fs::read_to_string(&log_path)?;
        std::fs::remove_file(&log_path)?;
        log
    } else {
        String::new()
    };

    let success = status.is_some_and(|s| s.success());
    let artifact_dir = match (&args.artifact_root, success) {
        (Some(root), true) => {
            let dest = root.join(Fingerprint::compute(BUILD_JOB, raw)?.as_str());
            sandbox.persist_to(&dest)?;
            Some(dest)
        }
        _ => None,
    };

    if success {
        tracing::debug!(config = %args.config, "build succeeded");
    } else {
        tracing::info!(config = %args.config, code = ?status.and_then(|s| s.code()), "build failed");
    }

    sandbox.exit();

    Ok(BuildOutcome {
        success,
        exit_code: status.and_then(|s| s.code()),
        output: text,
        log,
        artifact_dir,
    })
}
