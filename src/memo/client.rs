use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::{CacheStats, Fingerprint, MemoStore};
use crate::dispatch::Backend;
use crate::executors::JobRegistry;
use crate::types::config::{BackendKind, Settings};
use crate::types::job::Job;
use crate::{AcceptError, AcceptResult};

#[derive(Default)]
struct Pending {
    /// Submissions answered from the store, waiting for their `get`.
    satisfied: HashMap<Fingerprint, (Value, usize)>,
    /// Submissions handed to the backend, waiting for their `get`. Each one
    /// holds a backend claim that the matching `get` takes over and releases.
    forwarded: HashMap<Fingerprint, usize>,
}

/// Memoizing front for a dispatch backend.
///
/// `submit` starts work without waiting for it; `get` collects the result.
/// A job whose fingerprint is already in the store never reaches the
/// backend (unless the client was opened with `force`), and concurrent
/// submissions of the same job share one execution.
pub struct MemoClient {
    store: MemoStore,
    backend: Backend,
    /// Serializes "look up, then dispatch" against "record, then release"
    /// so a result is never both missed in the store and already released.
    pending: Mutex<Pending>,
    executed: AtomicU64,
    reused: AtomicU64,
    closed: AtomicBool,
}

impl MemoClient {
    /// Opens the store and the backend selected in `settings`.
    pub fn open(settings: &Settings, registry: JobRegistry) -> AcceptResult<Self> {
        let store = MemoStore::open(
            &settings.config.memo.db_path,
            settings.config.memo.hot_capacity,
            settings.force,
        )?;
        let backend = Backend::open(settings, registry)?;
        Ok(Self::with_parts(store, backend))
    }

    /// Assembles a client from an already opened store and backend.
    pub fn with_parts(store: MemoStore, backend: Backend) -> Self {
        tracing::debug!(
            backend = ?backend.kind(),
            force = store.is_forced(),
            "memo client opened"
        );
        Self {
            store,
            backend,
            pending: Mutex::new(Pending::default()),
            executed: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Runs `body` with a client and closes the client afterwards, whether
    /// the body succeeded or not.
    pub async fn scoped<F, Fut, T>(
        settings: &Settings,
        registry: JobRegistry,
        body: F,
    ) -> AcceptResult<T>
    where
        F: FnOnce(Arc<MemoClient>) -> Fut,
        Fut: Future<Output = AcceptResult<T>>,
    {
        let client = Arc::new(Self::open(settings, registry)?);
        let result = body(Arc::clone(&client)).await;
        client.close().await;
        result
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Starts `job` unless its result is memoized or it is already running.
    pub fn submit(&self, job: &Job) -> AcceptResult<()> {
        let fp = Fingerprint::of(job)?;
        let mut pending = self.lock()?;
        self.claim(&mut pending, job, &fp)
    }

    /// Records one submission of `fp`, either answered from the store or
    /// handed to the backend.
    fn claim(&self, pending: &mut Pending, job: &Job, fp: &Fingerprint) -> AcceptResult<()> {
        if let Some((_, count)) = pending.satisfied.get_mut(fp) {
            *count += 1;
            return Ok(());
        }

        if let Some(value) = self.store.lookup(fp)? {
            tracing::debug!(fingerprint = %fp.short(), function = %job.function, "memo hit");
            self.reused.fetch_add(1, Ordering::Relaxed);
            pending.satisfied.insert(fp.clone(), (value, 1));
            return Ok(());
        }

        *pending.forwarded.entry(fp.clone()).or_insert(0) += 1;
        self.backend.submit(job, fp);
        Ok(())
    }

    /// Waits for `job` and returns its result, submitting it first when no
    /// earlier `submit` is outstanding.
    pub async fn get_value(&self, job: &Job) -> AcceptResult<Value> {
        let fp = Fingerprint::of(job)?;

        {
            let mut pending = self.lock()?;
            if !pending.satisfied.contains_key(&fp) && !pending.forwarded.contains_key(&fp) {
                self.claim(&mut pending, job, &fp)?;
            }
            if let Some(value) = take_satisfied(&mut pending, &fp) {
                return Ok(value);
            }
            // From here on this call owns one backend claim.
            take_forwarded(&mut pending, &fp);
        }

        let outcome = self.backend.wait(job, &fp).await;

        let pending = self.lock()?;
        let recorded = match &outcome {
            Ok(value) => self.store.insert(&fp, &job.function, value),
            Err(_) => Ok(()),
        };
        self.backend.release(&fp);
        drop(pending);

        recorded?;
        match outcome {
            Ok(value) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(failure) => Err(failure.into_error(&job.function)),
        }
    }

    /// Like [`get_value`](Self::get_value), decoding the result.
    pub async fn get<T: DeserializeOwned>(&self, job: &Job) -> AcceptResult<T> {
        let value = self.get_value(job).await?;
        serde_json::from_value(value).map_err(|e| {
            AcceptError::CacheCorrupted(format!(
                "result of '{}' has an unexpected shape: {}; rerun with --force",
                job.function, e
            ))
        })
    }

    /// Memo store statistics for this client.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Number of results that came from a backend execution.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Number of submissions answered from the store.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Waits for (local) or abandons (cluster) whatever is still outstanding
    /// and tears the backend down. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.backend.shutdown().await;
        let stats = self.stats();
        tracing::info!(
            executed = self.executed(),
            reused = self.reused(),
            hits = stats.hits,
            misses = stats.misses,
            "memo client closed"
        );
    }

    fn lock(&self) -> AcceptResult<MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| AcceptError::CacheCorrupted("memo client lock poisoned".to_string()))
    }
}

fn take_satisfied(pending: &mut Pending, fp: &Fingerprint) -> Option<Value> {
    let (value, count) = pending.satisfied.get_mut(fp)?;
    let value = value.clone();
    *count -= 1;
    if *count == 0 {
        pending.satisfied.remove(fp);
    }
    Some(value)
}

fn take_forwarded(pending: &mut Pending, fp: &Fingerprint) {
    if let Some(count) = pending.forwarded.get_mut(fp) {
        *count -= 1;
        if *count == 0 {
            pending.forwarded.remove(fp);
        }
    }
}

impl Drop for MemoClient {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let cut = self.backend.abort();
            if cut > 0 {
                tracing::warn!(abandoned = cut, "memo client dropped with outstanding jobs");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LocalBackend;
    use crate::executors::JobHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for Counting {
        fn name(&self) -> &str {
            "count"
        }

        async fn execute(&self, job: &Job) -> AcceptResult<Value> {
            let args = &job.args;
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if args["fail"].as_bool().unwrap_or(false) {
                return Err(AcceptError::user("boom"));
            }
            Ok(json!({ "input": args["x"], "call": n }))
        }
    }

    fn client(force: bool) -> (MemoClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(Counting {
            calls: Arc::clone(&calls),
        }));
        let client = MemoClient::with_parts(
            MemoStore::in_memory(force).unwrap(),
            Backend::Local(LocalBackend::new(registry, 4)),
        );
        (client, calls)
    }

    fn job(x: i64) -> Job {
        Job::new("count", &json!({ "x": x })).unwrap()
    }

    #[tokio::test]
    async fn test_second_round_is_served_from_memo() {
        let (client, calls) = client(false);

        client.submit(&job(1)).unwrap();
        let first = client.get_value(&job(1)).await.unwrap();
        client.submit(&job(1)).unwrap();
        let second = client.get_value(&job(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.executed(), 1);
        assert_eq!(client.reused(), 1);
    }

    #[tokio::test]
    async fn test_force_recomputes_every_time() {
        let (client, calls) = client(true);

        client.submit(&job(1)).unwrap();
        let first = client.get_value(&job(1)).await.unwrap();
        client.submit(&job(1)).unwrap();
        let second = client.get_value(&job(1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first["call"], json!(1));
        assert_eq!(second["call"], json!(2));
    }

    #[tokio::test]
    async fn test_concurrent_submits_share_one_execution() {
        let (client, calls) = client(false);
        let client = Arc::new(client);

        for _ in 0..5 {
            client.submit(&job(7)).unwrap();
        }
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_value(&job(7)).await.unwrap() })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_extra_gets_take_their_own_claim() {
        let (client, calls) = client(false);
        let client = Arc::new(client);

        // One submission, three collectors: two of them never submitted.
        client.submit(&job(5)).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_value(&job(5)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap()["input"], json!(5));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let pending = client.lock().unwrap();
        assert!(pending.forwarded.is_empty());
        assert!(pending.satisfied.is_empty());
        drop(pending);

        // A collector arriving after the owner released reads the store.
        client.get_value(&job(5)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(client.reused() >= 1);
    }

    #[tokio::test]
    async fn test_get_without_submit() {
        let (client, calls) = client(false);
        let value = client.get_value(&job(3)).await.unwrap();
        assert_eq!(value["input"], json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Memoized by the implicit submission.
        client.get_value(&job(3)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoized() {
        let (client, calls) = client(false);
        let failing = Job::new("count", &json!({ "fail": true })).unwrap();

        let err = client.get_value(&failing).await.unwrap_err();
        assert!(err.is_user_facing());
        assert!(client.get_value(&failing).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_typed_get() {
        #[derive(serde::Deserialize)]
        struct Reply {
            input: i64,
        }

        let (client, _) = client(false);
        let reply: Reply = client.get(&job(11)).await.unwrap();
        assert_eq!(reply.input, 11);

        let err = client.get::<Vec<String>>(&job(11)).await.unwrap_err();
        assert!(matches!(err, AcceptError::CacheCorrupted(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _) = client(false);
        client.submit(&job(1)).unwrap();
        client.close().await;
        client.close().await;
    }
}
