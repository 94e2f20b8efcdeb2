//! Execution backends.
//!
//! A backend runs jobs and hands back their outcomes. It knows nothing
//! about memoization; [`crate::memo::MemoClient`] sits in front of it.
//!
//! Both backends keep an in-flight table keyed by fingerprint, so
//! submitting the same job twice before collecting it attaches to the
//! running execution instead of starting another.

mod cluster;
mod inflight;
mod local;

pub use cluster::{execute_job_file, ClusterBackend};
pub(crate) use cluster::write_atomic;
pub use inflight::Outcome;
pub use local::LocalBackend;

use crate::cache::Fingerprint;
use crate::executors::JobRegistry;
use crate::types::config::{BackendKind, Settings};
use crate::types::job::Job;
use crate::AcceptResult;

/// The closed set of places a job can execute.
pub enum Backend {
    Local(LocalBackend),
    Cluster(ClusterBackend),
}

impl Backend {
    /// Opens the backend selected in `settings`.
    pub fn open(settings: &Settings, registry: JobRegistry) -> AcceptResult<Self> {
        match settings.backend {
            BackendKind::Local => Ok(Self::Local(LocalBackend::new(
                registry,
                settings.config.local.pool_size(),
            ))),
            // Cluster jobs execute in worker processes with their own registry.
            BackendKind::Cluster => Ok(Self::Cluster(ClusterBackend::new(
                &settings.config.cluster,
            )?)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Cluster(_) => BackendKind::Cluster,
        }
    }

    /// Starts the job unless an execution for `fp` is already in flight.
    pub fn submit(&self, job: &Job, fp: &Fingerprint) {
        match self {
            Self::Local(b) => b.submit(job, fp),
            Self::Cluster(b) => b.submit(job, fp),
        }
    }

    /// Waits for the execution for `fp`, starting one if needed.
    pub async fn wait(&self, job: &Job, fp: &Fingerprint) -> Outcome {
        match self {
            Self::Local(b) => b.wait(job, fp).await,
            Self::Cluster(b) => b.wait(job, fp).await,
        }
    }

    /// Drops one submission's claim on the execution for `fp`.
    pub fn release(&self, fp: &Fingerprint) {
        match self {
            Self::Local(b) => b.release(fp),
            Self::Cluster(b) => b.release(fp),
        }
    }

    /// Waits for the job and releases it, turning a failure into an error.
    pub async fn get(&self, job: &Job, fp: &Fingerprint) -> AcceptResult<serde_json::Value> {
        let outcome = self.wait(job, fp).await;
        self.release(fp);
        outcome.map_err(|failure| failure.into_error(&job.function))
    }

    /// Local: lets outstanding jobs finish. Cluster: stops waiting for them.
    pub async fn shutdown(&self) {
        match self {
            Self::Local(b) => b.shutdown().await,
            Self::Cluster(b) => b.shutdown().await,
        }
    }

    /// Cancels outstanding work immediately. Returns how many jobs were cut off.
    pub fn abort(&self) -> usize {
        match self {
            Self::Local(b) => b.abort(),
            Self::Cluster(b) => b.abort(),
        }
    }
}
