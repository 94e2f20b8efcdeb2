//! Integration tests for the memo client with real build and run jobs.

#![cfg(unix)]

mod common;

use std::sync::Arc;

use accept::cache::{Fingerprint, MemoStore};
use accept::executors::{BuildArgs, JobRegistry, Phase, RunArgs};
use accept::memo::MemoClient;
use accept::types::evaluation::{BuildOutcome, RunOutcome};
use accept::types::job::Configuration;
use common::Bench;

#[tokio::test]
async fn test_build_once_reuse_tree_for_runs() {
    let bench = Bench::new("reuse", "[]");
    let settings = bench.settings(1, false);
    let client = MemoClient::open(&settings, JobRegistry::standard()).unwrap();

    let config = Configuration::from_knobs([("scale", 5)]);
    let build = BuildArgs::new(&bench.appdir, config.clone(), &settings)
        .unwrap()
        .job()
        .unwrap();

    client.submit(&build).unwrap();
    let first: BuildOutcome = client.get(&build).await.unwrap();
    client.submit(&build).unwrap();
    let second: BuildOutcome = client.get(&build).await.unwrap();

    assert_eq!(first, second);
    assert!(first.success);
    assert_eq!(first.log.trim(), "remark: loop perforated");
    assert_eq!(bench.builds(), 1);

    let tree = first.artifact_dir.clone().unwrap();
    assert!(tree.join("variant.txt").is_file());
    assert!(!tree.join("accept_log.txt").exists());

    for rep in 0..2 {
        let run = RunArgs::new(&tree, config.clone(), rep, Phase::Search, &settings)
            .job()
            .unwrap();
        let outcome: RunOutcome = client.get(&run).await.unwrap();
        assert_eq!(outcome.output, Some(vec![1.05]));
    }
    assert_eq!(bench.runs(), 2);
    // Runs work on their own copies.
    assert!(!tree.join("my_output.txt").exists());

    client.close().await;
}

#[tokio::test]
async fn test_results_survive_reopening_the_store() {
    let bench = Bench::new("persist", "[]");
    let settings = bench.settings(1, false);
    let job = BuildArgs::new(&bench.appdir, Configuration::precise(), &settings)
        .unwrap()
        .job()
        .unwrap();

    let first = MemoClient::scoped(&settings, JobRegistry::standard(), |client| {
        let job = job.clone();
        async move { client.get_value(&job).await }
    })
    .await
    .unwrap();

    let store = MemoStore::open(&settings.config.memo.db_path, 8, false).unwrap();
    let fp = Fingerprint::of(&job).unwrap();
    assert_eq!(store.lookup(&fp).unwrap(), Some(first.clone()));
    assert_eq!(store.fingerprints_for("build").unwrap(), vec![fp]);
    drop(store);

    let second = MemoClient::scoped(&settings, JobRegistry::standard(), |client| {
        let job = job.clone();
        async move { client.get_value(&job).await }
    })
    .await
    .unwrap();

    assert_eq!(first, second);
    assert_eq!(bench.builds(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_build() {
    let bench = Bench::new("shared", "[]");
    let settings = bench.settings(1, false);
    let client = Arc::new(MemoClient::open(&settings, JobRegistry::standard()).unwrap());
    let job = BuildArgs::new(&bench.appdir, Configuration::precise(), &settings)
        .unwrap()
        .job()
        .unwrap();

    for _ in 0..8 {
        client.submit(&job).unwrap();
    }
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            let job = job.clone();
            tokio::spawn(async move { client.get_value(&job).await.unwrap() })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }

    assert!(values.iter().all(|v| v == &values[0]));
    assert_eq!(bench.builds(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_corrupted_store_is_reported() {
    let bench = Bench::new("corrupt", "[]");
    let settings = bench.settings(1, false);
    let db = &settings.config.memo.db_path;
    std::fs::create_dir_all(db.parent().unwrap()).unwrap();
    std::fs::write(db, vec![0x42u8; 4096]).unwrap();

    let err = MemoClient::open(&settings, JobRegistry::standard())
        .err()
        .unwrap();
    assert!(err.is_user_facing());
}
