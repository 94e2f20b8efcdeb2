//! Cluster backend end to end: a stand-in scheduler runs the submission
//! script in the background, which invokes `accept worker`.

#![cfg(unix)]

mod common;

use accept::executors::{BuildArgs, JobRegistry};
use accept::memo::MemoClient;
use accept::types::config::{BackendKind, Settings};
use accept::types::evaluation::BuildOutcome;
use accept::types::job::{Configuration, Job};
use common::Bench;

fn cluster_settings(bench: &Bench) -> Settings {
    let mut config = bench.config();
    config.cluster.submit_command = "sh".to_string();
    config.cluster.submit_args = vec![
        "-c".to_string(),
        r#"sh "$0" > /dev/null 2>&1 & echo "4242;local""#.to_string(),
    ];
    config.cluster.poll_interval_ms = 50;
    config.cluster.worker_exe = Some(env!("CARGO_BIN_EXE_accept").into());
    Settings::new(config, BackendKind::Cluster, false, 1, None, false)
}

#[tokio::test]
async fn test_build_through_worker() {
    let bench = Bench::new("remote", "[]");
    let settings = cluster_settings(&bench);
    let job = BuildArgs::new(&bench.appdir, Configuration::precise(), &settings)
        .unwrap()
        .job()
        .unwrap();

    let outcome = MemoClient::scoped(&settings, JobRegistry::standard(), |client| {
        let job = job.clone();
        async move {
            assert_eq!(client.backend_kind(), BackendKind::Cluster);
            client.submit(&job)?;
            client.get::<BuildOutcome>(&job).await
        }
    })
    .await
    .unwrap();

    assert!(outcome.success);
    assert!(outcome.output.contains("compiled"));
    assert!(outcome.artifact_dir.unwrap().is_dir());
    assert_eq!(bench.builds(), 1);

    // Memoized: the second round never reaches the scheduler.
    MemoClient::scoped(&settings, JobRegistry::standard(), |client| async move {
        client.get::<BuildOutcome>(&job).await
    })
    .await
    .unwrap();
    assert_eq!(bench.builds(), 1);
}

#[tokio::test]
async fn test_remote_failure_comes_back_as_error() {
    let bench = Bench::new("remote_fail", "[]");
    let settings = cluster_settings(&bench);
    let job = Job::new("no_such_handler", &serde_json::json!({})).unwrap();

    let err = MemoClient::scoped(&settings, JobRegistry::standard(), |client| async move {
        client.get_value(&job).await
    })
    .await
    .unwrap_err();

    assert!(!err.is_user_facing());
    assert!(err.to_string().contains("no_such_handler"));
}

#[tokio::test]
async fn test_dead_worker_fails_the_job() {
    let bench = Bench::new("dead_worker", "[]");
    let mut settings = cluster_settings(&bench);
    settings.config.cluster.worker_exe = Some("/bin/false".into());
    let job = BuildArgs::new(&bench.appdir, Configuration::precise(), &settings)
        .unwrap()
        .job()
        .unwrap();

    let client = MemoClient::open(&settings, JobRegistry::standard()).unwrap();
    client.submit(&job).unwrap();
    let err = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        client.get::<BuildOutcome>(&job),
    )
    .await
    .expect("get returns once the worker is gone")
    .unwrap_err();
    client.close().await;

    assert!(!err.is_user_facing());
    assert!(err.to_string().contains("worker exited with status 1"));
    assert_eq!(bench.builds(), 0);

    // The failure is not memoized.
    let store = accept::cache::MemoStore::open(&settings.config.memo.db_path, 8, false).unwrap();
    assert!(store.is_empty().unwrap());
}
