//! Local worker pool.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::inflight::{InFlight, Outcome};
use crate::cache::Fingerprint;
use crate::executors::JobRegistry;
use crate::types::errors::JobFailure;
use crate::types::job::Job;

/// Runs jobs as tokio tasks, at most `pool_size` at a time.
pub struct LocalBackend {
    registry: Arc<JobRegistry>,
    slots: Arc<Semaphore>,
    pool_size: usize,
    inflight: InFlight,
}

impl LocalBackend {
    pub fn new(registry: JobRegistry, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        tracing::debug!(pool_size, "local worker pool started");
        Self {
            registry: Arc::new(registry),
            slots: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            inflight: InFlight::new(),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Queues the job; it starts as soon as a slot is free.
    pub fn submit(&self, job: &Job, fp: &Fingerprint) {
        let Some(done) = self.inflight.begin(fp) else {
            return;
        };

        let registry = Arc::clone(&self.registry);
        let slots = Arc::clone(&self.slots);
        let job = job.clone();
        let short = fp.short().to_string();

        let task = tokio::spawn(async move {
            let outcome: Outcome = match slots.acquire_owned().await {
                Ok(_permit) => {
                    tracing::debug!(fingerprint = %short, function = %job.function, "job started");
                    // Panics inside a handler stay inside this task; the
                    // dropped sender reports the job as abandoned.
                    registry
                        .execute(&job)
                        .await
                        .map_err(|e| JobFailure::from_error(&e))
                }
                Err(_) => Err(JobFailure {
                    user: false,
                    message: "worker pool shut down".to_string(),
                }),
            };
            let _ = done.send(Some(outcome));
        });
        self.inflight.set_task(fp, task.abort_handle());
    }

    /// Waits for the job to finish, submitting it first if nobody did.
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

    /// Lets outstanding jobs finish, then closes the pool.
    pub async fn shutdown(&self) {
        let outstanding = self.inflight.len();
        if outstanding > 0 {
            tracing::info!(outstanding, "waiting for outstanding local jobs");
            self.inflight.drain().await;
        }
        self.inflight.abandon();
        self.slots.close();
    }

    /// Aborts whatever is still running.
    pub fn abort(&self) -> usize {
        let unfinished = self.inflight.abandon();
        self.slots.close();
        unfinished
    }
}
