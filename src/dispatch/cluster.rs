//! Batch-scheduler backend.
//!
//! A submitted job is written to the shared directory as JSON together with
//! a small shell script that runs `accept worker` on it. The script goes to
//! the scheduler (`sbatch` by default); the worker writes the result file
//! next to the job, and a polling task picks it up. If the worker exits
//! without a result, the script writes a failure in its place. A job whose
//! result never shows up fails after `result_timeout_secs`.
//!
//! Layout under the shared directory:
//!
//! ```text
//! jobs/<fingerprint>.json     serialized Job
//! jobs/<fingerprint>.sh       submission script
//! results/<fingerprint>.json  Result<Value, JobFailure>
//! logs/<fingerprint>.log      scheduler output
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::inflight::{Completion, InFlight, Outcome};
use crate::cache::Fingerprint;
use crate::executors::JobRegistry;
use crate::types::config::ClusterConfig;
use crate::types::errors::JobFailure;
use crate::types::job::Job;
use crate::{AcceptError, AcceptResult};

/// Submits jobs to an external scheduler and collects results from shared storage.
pub struct ClusterBackend {
    inner: Arc<Submitter>,
    inflight: InFlight,
}

struct Submitter {
    config: ClusterConfig,
    shared_dir: PathBuf,
    worker_exe: PathBuf,
    session: String,
}

impl ClusterBackend {
    /// Prepares the shared directory and resolves the worker executable.
    pub fn new(config: &ClusterConfig) -> AcceptResult<Self> {
        let shared_dir = std::path::absolute(&config.shared_dir)?;
        for sub in ["jobs", "results", "logs"] {
            std::fs::create_dir_all(shared_dir.join(sub)).map_err(|e| {
                AcceptError::user(format!(
                    "cannot use shared directory {}: {}",
                    shared_dir.display(),
                    e
                ))
            })?;
        }

        let worker_exe = match &config.worker_exe {
            Some(exe) => std::path::absolute(exe)?,
            None => std::env::current_exe()?,
        };

        let session = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        tracing::info!(
            shared_dir = %shared_dir.display(),
            scheduler = %config.submit_command,
            session = %session,
            "cluster session opened"
        );

        Ok(Self {
            inner: Arc::new(Submitter {
                config: config.clone(),
                shared_dir,
                worker_exe,
                session,
            }),
            inflight: InFlight::new(),
        })
    }

    /// Hands the job to the scheduler in the background.
    pub fn submit(&self, job: &Job, fp: &Fingerprint) {
        let Some(done) = self.inflight.begin(fp) else {
            return;
        };
        let submitter = Arc::clone(&self.inner);
        let job = job.clone();
        let fp_owned = fp.clone();
        let task = tokio::spawn(async move {
            submitter.run(job, fp_owned, done).await;
        });
        self.inflight.set_task(fp, task.abort_handle());
    }

    /// Waits for the job's result file, submitting the job first if nobody did.
    pub async fn wait(&self, job: &Job, fp: &Fingerprint) -> Outcome {
        if !self.inflight.contains(fp) {
            self.submit(job, fp);
        }
        match self.inflight.wait(fp).await {
            Some(outcome) => outcome,
            None => Err(JobFailure {
                user: false,
                message: "job vanished before completion".to_string(),
            }),
        }
    }

    pub fn release(&self, fp: &Fingerprint) {
        self.inflight.release(fp);
    }

    /// Stops polling. Jobs already queued keep running on the cluster; their
    /// results stay in the shared directory but are not memoized.
    pub async fn shutdown(&self) {
        self.abort();
    }

    pub fn abort(&self) -> usize {
        let abandoned = self.inflight.abandon();
        if abandoned > 0 {
            tracing::warn!(abandoned, "abandoning uncollected cluster jobs");
        }
        abandoned
    }

    pub fn shared_dir(&self) -> &Path {
        &self.inner.shared_dir
    }
}

impl Submitter {
    async fn run(&self, job: Job, fp: Fingerprint, done: Completion) {
        let outcome = match self.submit(&job, &fp).await {
            Ok(result_path) => self.poll(&result_path).await,
            Err(e) => Err(JobFailure::from_error(&e)),
        };
        let _ = done.send(Some(outcome));
    }

    async fn submit(&self, job: &Job, fp: &Fingerprint) -> AcceptResult<PathBuf> {
        let job_path = self.shared_dir.join("jobs").join(format!("{fp}.json"));
        let script_path = self.shared_dir.join("jobs").join(format!("{fp}.sh"));
        let result_path = self.shared_dir.join("results").join(format!("{fp}.json"));
        let log_path = self.shared_dir.join("logs").join(format!("{fp}.log"));

        // A stale result from an earlier (possibly forced-over) run must not
        // be mistaken for this one.
        if result_path.exists() {
            std::fs::remove_file(&result_path)?;
        }

        write_atomic(&job_path, serde_json::to_string_pretty(job)?.as_bytes())?;
        write_atomic(
            &script_path,
            worker_script(&self.worker_exe, &job_path, &result_path).as_bytes(),
        )?;

        let name = format!("accept-{}-{}", self.session, fp.short());
        let args: Vec<String> = self
            .config
            .submit_args
            .iter()
            .map(|arg| {
                arg.replace("{name}", &name)
                    .replace("{log}", &log_path.to_string_lossy())
            })
            .collect();

        let output = tokio::process::Command::new(&self.config.submit_command)
            .args(&args)
            .arg(&script_path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AcceptError::Scheduler(format!(
                        "'{}' not found; is the scheduler available on this host?",
                        self.config.submit_command
                    ))
                } else {
                    AcceptError::Scheduler(format!(
                        "failed to run '{}': {}",
                        self.config.submit_command, e
                    ))
                }
            })?;

        if !output.status.success() {
            return Err(AcceptError::Scheduler(format!(
                "'{}' rejected job {}: {}",
                self.config.submit_command,
                fp.short(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let scheduler_id = stdout.trim().split(';').next().unwrap_or("").to_string();
        tracing::debug!(
            fingerprint = %fp.short(),
            function = %job.function,
            scheduler_id = %scheduler_id,
            "job queued"
        );

        Ok(result_path)
    }

    async fn poll(&self, result_path: &Path) -> Outcome {
        let interval = self.config.poll_interval();
        let wait = async {
            loop {
                if result_path.exists() {
                    return read_result(result_path);
                }
                tokio::time::sleep(interval).await;
            }
        };
        let Some(limit) = self.config.result_timeout() else {
            return wait.await;
        };
        match tokio::time::timeout(limit, wait).await {
            Ok(outcome) => outcome,
            Err(_) => Err(JobFailure {
                user: false,
                message: format!(
                    "no result at {} after {}s; the scheduler may have killed the job",
                    result_path.display(),
                    limit.as_secs()
                ),
            }),
        }
    }
}

fn read_result(path: &Path) -> Outcome {
    let text = std::fs::read_to_string(path).map_err(|e| JobFailure {
        user: false,
        message: format!("cannot read result {}: {}", path.display(), e),
    })?;
    serde_json::from_str::<Outcome>(&text).unwrap_or_else(|e| {
        Err(JobFailure {
            user: false,
            message: format!("malformed result {}: {}", path.display(), e),
        })
    })
}

/// Submission script. A worker that dies before writing its result leaves a
/// failure record behind, written through a rename like `write_atomic`.
fn worker_script(exe: &Path, job: &Path, result: &Path) -> String {
    let result = result.to_string_lossy();
    let partial = shell_quote(&format!("{result}.partial"));
    let result = shell_quote(&result);
    format!(
        "#!/bin/sh\n\
         {exe} worker --job {job} --result {result}\n\
         status=$?\n\
         if [ $status -ne 0 ] && [ ! -f {result} ]; then\n  \
         printf '{{\"Err\":{{\"user\":false,\"message\":\"worker exited with status %s\"}}}}' \"$status\" > {partial}\n  \
         mv -f {partial} {result}\n\
         fi\n\
         exit $status\n",
        exe = shell_quote(&exe.to_string_lossy()),
        job = shell_quote(&job.to_string_lossy()),
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Writes a file so that readers see either nothing or all of it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> AcceptResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, bytes)?;
    tmp.persist(path).map_err(|e| AcceptError::Io(e.error))?;
    Ok(())
}

/// Worker side: executes the job in `job_path` and writes its outcome to
/// `result_path`. Job failures end up in the result file; only problems
/// reading the job or writing the result are returned as errors.
pub async fn execute_job_file(
    registry: &JobRegistry,
    job_path: &Path,
    result_path: &Path,
) -> AcceptResult<()> {
    let job: Job = serde_json::from_str(&std::fs::read_to_string(job_path)?)?;
    tracing::info!(function = %job.function, job = %job_path.display(), "worker executing job");

    let outcome: Outcome = registry
        .execute(&job)
        .await
        .map_err(|e| JobFailure::from_error(&e));
    if let Err(failure) = &outcome {
        tracing::warn!(function = %job.function, message = %failure.message, "job failed");
    }

    write_atomic(result_path, serde_json::to_string(&outcome)?.as_bytes())
}
