//! Table of executions that have been submitted but not yet collected.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::cache::Fingerprint;
use crate::types::errors::JobFailure;

/// What an execution finally produced.
pub type Outcome = Result<Value, JobFailure>;

/// Sending half handed to whoever performs the execution.
pub type Completion = watch::Sender<Option<Outcome>>;

struct Entry {
    rx: watch::Receiver<Option<Outcome>>,
    /// Submissions not yet matched by a release.
    waiters: usize,
    task: Option<AbortHandle>,
}

/// At most one execution per fingerprint; later submitters attach to it.
#[derive(Default)]
pub struct InFlight {
    entries: Mutex<HashMap<Fingerprint, Entry>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a submission for `fp`.
    ///
    /// Returns the completion channel when the caller is the first submitter
    /// and must start the execution; `None` when it attached to one already
    /// running.
    pub fn begin(&self, fp: &Fingerprint) -> Option<Completion> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(fp) {
            entry.waiters += 1;
            tracing::trace!(fingerprint = %fp.short(), waiters = entry.waiters, "attached to running job");
            return None;
        }
        let (tx, rx) = watch::channel(None);
        entries.insert(
            fp.clone(),
            Entry {
                rx,
                waiters: 1,
                task: None,
            },
        );
        Some(tx)
    }

    /// Records the task performing the execution so it can be aborted.
    pub fn set_task(&self, fp: &Fingerprint, task: AbortHandle) {
        if let Some(entry) = self.lock().get_mut(fp) {
            entry.task = Some(task);
        }
    }

    /// Whether an execution for `fp` is registered.
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.lock().contains_key(fp)
    }

    /// Waits for the execution for `fp` to finish. `None` if nothing was
    /// submitted for it.
    pub async fn wait(&self, fp: &Fingerprint) -> Option<Outcome> {
        let rx = self.lock().get(fp).map(|entry| entry.rx.clone())?;
        Some(wait_outcome(rx).await)
    }

    /// Matches one earlier `begin`. The entry goes away with its last waiter,
    /// so a later submission starts a fresh execution.
    pub fn release(&self, fp: &Fingerprint) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(fp) {
            entry.waiters = entry.waiters.saturating_sub(1);
            if entry.waiters == 0 {
                entries.remove(fp);
            }
        }
    }

    /// Number of registered executions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for every registered execution to finish without releasing them.
    pub async fn drain(&self) {
        let pending: Vec<watch::Receiver<Option<Outcome>>> =
            self.lock().values().map(|entry| entry.rx.clone()).collect();
        for rx in pending {
            let _ = wait_outcome(rx).await;
        }
    }

    /// Aborts every execution task and forgets all entries. Returns how many
    /// entries were still unfinished.
    pub fn abandon(&self) -> usize {
        let mut entries = self.lock();
        let mut unfinished = 0;
        for (_, entry) in entries.drain() {
            if entry.rx.borrow().is_none() {
                unfinished += 1;
            }
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        unfinished
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, Entry>> {
        // A panic while holding this lock cannot leave an entry half-updated.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn wait_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| {
        Err(JobFailure {
            user: false,
            message: "job was abandoned before it finished".to_string(),
        })
    })
}
