//! Command implementations.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatch::execute_job_file;
use crate::eval::Evaluator;
use crate::executors::{BuildArgs, CommandDemangler, Demangler, JobRegistry};
use crate::memo::MemoClient;
use crate::report::{self, ResultsFile, RESULTS_JSON};
use crate::types::config::Settings;
use crate::types::evaluation::BuildOutcome;
use crate::types::job::Configuration;
use crate::{AcceptError, AcceptResult};

/// Runs the workflow for one benchmark and prints the good configurations.
pub async fn run(settings: &Settings, appdir: &Path, verbose: bool, test: bool) -> AcceptResult<()> {
    let lines = MemoClient::scoped(settings, JobRegistry::standard(), |client| async move {
        let mut ev = Evaluator::new(appdir, settings, &client)?;
        let results = ev.run().await?;

        let (results, baseline) = if test {
            let tested = ev.test_results(&results).await?;
            (tested, ev.test_baseline())
        } else {
            (results, ev.baseline())
        };
        let reference = baseline.map(|b| b.output.clone()).unwrap_or_default();
        Ok(report::dump_results(&results, &reference, verbose))
    })
    .await?;

    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// Options of the `exp` command.
#[derive(Debug, Clone, Default)]
pub struct ExpOptions {
    pub as_json: bool,
    pub include_time: bool,
    pub only: Vec<String>,
    pub verbose: bool,
}

/// Evaluates several benchmarks, optionally accumulating into results.json.
pub async fn exp(settings: &Settings, appdirs: &[PathBuf], options: &ExpOptions) -> AcceptResult<()> {
    let selected: Vec<&PathBuf> = appdirs
        .iter()
        .filter(|dir| options.only.is_empty() || options.only.contains(&dir_name(dir)))
        .collect();
    if selected.is_empty() {
        return Err(AcceptError::user("no benchmark matches --only"));
    }

    let mut results_json = if options.as_json {
        Some(ResultsFile::load(RESULTS_JSON)?)
    } else {
        None
    };

    let progress = ProgressBar::new(selected.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    MemoClient::scoped(settings, JobRegistry::standard(), |client| {
        let progress = progress.clone();
        let results_json = &mut results_json;
        async move {
            for appdir in selected {
                let name = dir_name(appdir);
                progress.set_message(name.clone());
                tracing::info!(benchmark = %name, "evaluating");

                let mut ev = Evaluator::new(appdir, settings, &client)?;
                let results = ev.run().await?;
                let baseline = ev
                    .baseline()
                    .ok_or_else(|| AcceptError::user("baseline unavailable"))?;

                match results_json.as_mut() {
                    Some(file) => {
                        let entry =
                            report::benchmark_entry(&baseline.result, &results, options.include_time)?;
                        file.merge(&name, entry);
                        file.save()?;
                    }
                    None => {
                        let lines = report::dump_results(&results, &baseline.output, options.verbose);
                        progress.suspend(|| {
                            println!("{}:", name);
                            for line in lines {
                                println!("  {}", line);
                            }
                        });
                    }
                }
                progress.inc(1);
            }
            Ok(())
        }
    })
    .await?;

    progress.finish_and_clear();
    if let Some(file) = results_json {
        println!("results written to {}", file.path().display());
    }
    Ok(())
}

/// Builds the baseline and prints the compiler output.
pub async fn build(settings: &Settings, appdir: &Path) -> AcceptResult<()> {
    let outcome = inspect_build(settings, appdir).await?;
    println!("{}", outcome.output);
    Ok(())
}

/// Builds the baseline and prints the (demangled) optimization log.
pub async fn log(settings: &Settings, appdir: &Path) -> AcceptResult<()> {
    let outcome = inspect_build(settings, appdir).await?;
    let text = CommandDemangler::default().demangle(&outcome.log).await;
    println!("{}", text);
    Ok(())
}

async fn inspect_build(settings: &Settings, appdir: &Path) -> AcceptResult<BuildOutcome> {
    let job = BuildArgs::new(appdir, Configuration::precise(), settings)?
        .for_inspection()
        .job()?;
    MemoClient::scoped(settings, JobRegistry::standard(), |client| async move {
        client.submit(&job)?;
        client.get::<BuildOutcome>(&job).await
    })
    .await
}

/// Runs only the baseline and prints its output and timings.
pub async fn precise(settings: &Settings, appdir: &Path) -> AcceptResult<()> {
    let lines = MemoClient::scoped(settings, JobRegistry::standard(), |client| async move {
        let mut ev = Evaluator::new(appdir, settings, &client)?;
        let times = ev.precise_times().await?;
        let output = ev.baseline().map(|b| b.output.clone()).unwrap_or_default();
        Ok(report::dump_precise(&output, &times))
    })
    .await?;

    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// Runs approximate configurations and prints per-replicate details.
/// `num` selects one configuration; -1 shows all of them.
pub async fn approx(settings: &Settings, num: i64, appdir: &Path) -> AcceptResult<()> {
    let results = MemoClient::scoped(settings, JobRegistry::standard(), |client| async move {
        let mut ev = Evaluator::new(appdir, settings, &client)?;
        ev.run().await
    })
    .await?;

    let chosen = match num {
        -1 => results,
        n => {
            let result = usize::try_from(n)
                .ok()
                .and_then(|i| results.get(i).cloned())
                .ok_or_else(|| {
                    AcceptError::user(format!(
                        "no configuration {} (there are {})",
                        n,
                        results.len()
                    ))
                })?;
            vec![result]
        }
    };

    for result in &chosen {
        for line in report::dump_approx(result) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Cluster worker: executes one job file and writes its result file.
pub async fn worker(job: &Path, result: &Path) -> AcceptResult<()> {
    execute_job_file(&JobRegistry::standard(), job, result).await
}

fn dir_name(dir: &Path) -> String {
    std::fs::canonicalize(dir)
        .ok()
        .as_deref()
        .unwrap_or(dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}
